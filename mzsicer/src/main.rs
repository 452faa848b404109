use std::io;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzsicer::{MZSicer, MZSicerError};

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn make_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy()
}

/// Forward `log` records, as emitted by `mzdata`, to the `tracing` subscriber
fn bridge_log() -> io::Result<()> {
    tracing_log::LogTracer::init().map_err(io::Error::other)
}

/// Install the STDERR logger and, when requested, a second logger writing to `args.log_file`.
///
/// The returned guard must be held until the program exits so buffered file output is flushed.
fn configure_log(args: &MZSicer) -> io::Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer()
        .compact()
        .with_timer(fmt::time::ChronoLocal::rfc_3339())
        .with_writer(io::stderr)
        .with_filter(make_filter());

    match args.log_file.as_ref() {
        Some(path) => {
            let handle = std::fs::File::create(path)?;
            let (writer, guard) = tracing_appender::non_blocking(handle);
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(make_filter());
            let subscriber = tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer);
            tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)?;
            bridge_log()?;
            Ok(Some(guard))
        }
        None => {
            let subscriber = tracing_subscriber::registry().with(stderr_layer);
            tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)?;
            bridge_log()?;
            Ok(None)
        }
    }
}

fn main() -> Result<(), MZSicerError> {
    let args = MZSicer::parse().configure()?;
    let _guard = configure_log(&args)?;
    args.main()?;
    Ok(())
}
