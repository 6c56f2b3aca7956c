//! Simulated URL fetch, the slow computation the driver memoizes.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::compute::Compute;

/// Response body. Shared, so handing it to every caller of a key is cheap.
pub type Body = Arc<[u8]>;

/// Reasons a fetch fails.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The key doesn't look like `scheme://host...`.
    #[error("invalid url: {0:?}")]
    InvalidUrl(String),
    /// The host was configured to be unreachable.
    #[error("{0}: host unreachable")]
    Unreachable(String),
}

/// Pretends to download a URL: sleeps for `latency` plus up to half again as much jitter, then
/// returns a body of `1024 * url.len()` bytes.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFetch {
    latency: Duration,
    failing: HashSet<String>,
}

impl SimulatedFetch {
    /// Creates a fetch where every url in `failing` is unreachable.
    pub fn new<I>(latency: Duration, failing: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            latency,
            failing: failing.into_iter().collect(),
        }
    }

    fn delay(&self) -> Duration {
        let jitter = self.latency / 2;
        if jitter.is_zero() {
            return self.latency;
        }
        self.latency + rand::thread_rng().gen_range(Duration::ZERO..=jitter)
    }
}

impl Compute<String> for SimulatedFetch {
    type Value = Body;
    type Error = FetchError;

    fn compute(&self, url: &String) -> Result<Body, FetchError> {
        if !url.contains("://") {
            return Err(FetchError::InvalidUrl(url.clone()));
        }
        let delay = self.delay();
        debug!(%url, ?delay, "fetching");
        thread::sleep(delay);
        if self.failing.contains(url) {
            return Err(FetchError::Unreachable(url.clone()));
        }
        Ok(vec![b'.'; 1024 * url.len()].into())
    }
}

/// The worklist the driver uses when none is given. Every url appears twice. The `sim://` scheme
/// marks them as simulated: nothing is downloaded and body sizes are made up.
pub fn default_urls() -> Vec<String> {
    let urls = [
        "sim://golang.org",
        "sim://godoc.org",
        "sim://play.golang.org",
        "sim://gopl.io",
    ];
    urls.iter().chain(urls.iter()).map(|url| url.to_string()).collect()
}
