//! MEMS Fault Code Reader - Main Entry Point

use anyhow::Context;
use mems_reader::{init_logging, run, ReaderSettings};
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let settings =
        ReaderSettings::load(config_path.as_deref()).context("invalid reader settings")?;

    init_logging(settings.json_logs, settings.verbose)?;

    info!("=== MEMS Fault Code Reader v{} ===", env!("CARGO_PKG_VERSION"));
    run(settings).await
}
