//! raw-still: capture one frame from a V4L2 camera into `image.raw`.

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use raw_still::cli::{Cli, DEFAULT_LOG_LEVEL};
use raw_still::pipeline;

fn main() {
    let cli = Cli::parse();

    // The filter comes from the command line only; the environment is not read.
    let filter = EnvFilter::try_new(&cli.log_level);
    let invalid_filter = filter.is_err();
    tracing_subscriber::fmt()
        .with_env_filter(filter.unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)))
        .with_writer(std::io::stderr)
        .init();
    if invalid_filter {
        warn!(filter = %cli.log_level, "invalid log filter, using {DEFAULT_LOG_LEVEL}");
    }

    if let Err(err) = run(&cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> raw_still::Result<()> {
    if let Some(threads) = cli.threads {
        if let Err(err) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            warn!(%err, threads, "could not size the unpack thread pool");
        }
    }

    let config = cli.to_config();
    info!(
        device = %config.device.display(),
        format = %config.shift,
        output = %config.output.display(),
        "capturing"
    );

    let report = pipeline::run(config)?;
    println!(
        "{}x{} {} frame ({} bytes) saved to {}",
        report.format.width,
        report.format.height,
        report.shift,
        report.bytes_written,
        report.output.display()
    );
    Ok(())
}
