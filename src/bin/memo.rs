use std::process::ExitCode;

use clap::Parser;
use memo::driver::{self, Config};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let config = Config::parse();

    // Logs go to stderr so the report lines on stdout stay parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memo=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let stats = driver::run_config(&config);
    for report in stats.reports() {
        println!("{report}");
    }

    if stats.failures() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
