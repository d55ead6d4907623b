use clap::Parser;
use miette::{Context, IntoDiagnostic};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// path to the serial device (e.g. /dev/ttyUSB0)
    path: PathBuf,

    /// whether to include verbose tracing of every byte sent/received.
    #[arg(short, long)]
    verbose: bool,

    /// a comma-separated list of `tracing` targets and levels to enable.
    ///
    /// see <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/targets/struct.Targets.html#filtering-with-targets>
    /// for the syntax.
    #[arg(
        short,
        long = "trace",
        env = "SERMIO_TRACE",
        default_value = "info"
    )]
    trace_filter: tracing_subscriber::filter::Targets,
}

fn main() -> miette::Result<()> {
    let Args {
        path,
        verbose,
        trace_filter,
    } = Args::parse();

    let trace_filter = if verbose {
        trace_filter.with_target("sermio_hostd", tracing::Level::TRACE)
    } else {
        trace_filter
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(trace_filter)
        .try_init()
        .into_diagnostic()
        .context("failed to install tracing subscriber")?;

    let mut port = sermio_hostd::open(&path)
        .into_diagnostic()
        .with_context(|| format!("failed to open {}", path.display()))?;

    tracing::info!(path = %path.display(), baud = sermio_hostd::BAUD_RATE, "opened serial port");

    let device = sermio_hostd::Device::new();
    device
        .run(&mut port)
        .into_diagnostic()
        .context("device event loop exited")
}
