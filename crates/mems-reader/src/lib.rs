//! MEMS Fault Code Reader
//!
//! Connects to the ECU (or the emulator), initialises it, then runs the
//! polling loop and the distribution pipeline until interrupted or the link
//! fails.

pub mod console;
mod settings;

pub use settings::{ReaderSettings, SettingsError};

use anyhow::Context;
use mems_pipeline::{DistributionPipeline, UiMessage, UiSink};
use mems_protocol::{EmulatedEcu, ProtocolSession, SerialLink};
use mems_scheduler::PollingLoop;
use tokio::sync::{mpsc, watch};
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Install the global tracing subscriber
pub fn init_logging(json: bool, verbose: bool) -> Result<(), SetGlobalDefaultError> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}

/// Open and initialise the ECU session described by `settings`
pub async fn connect(settings: &ReaderSettings) -> anyhow::Result<ProtocolSession> {
    let serial = settings.serial_config();
    let mut session = if settings.emulated {
        info!("Using emulated ECU");
        ProtocolSession::new(SerialLink::emulated(EmulatedEcu::default(), &serial))
    } else {
        ProtocolSession::connect(&settings.port, &serial)
            .with_context(|| format!("cannot open {}", settings.port))?
    };

    let ecu_id = session
        .initialize()
        .await
        .context("ECU did not complete initialisation")?;
    info!("Ready to poll ECU {} (emulated: {})", ecu_id, session.is_emulated());
    Ok(session)
}

/// Run one connection epoch to completion
pub async fn run(settings: ReaderSettings) -> anyhow::Result<()> {
    let mut session = connect(&settings).await?;

    let (ui, ui_rx) = UiSink::channel(settings.ui_channel_depth);
    let ui_task = tokio::spawn(drain_ui(ui_rx));

    let (tx, rx) = mpsc::channel(settings.pipeline_channel_depth);
    let pipeline = DistributionPipeline::new(settings.pipeline_config(), ui).spawn(rx);

    let (control_tx, control_rx) = mpsc::channel(8);
    std::thread::spawn(move || console::forward_lines(std::io::stdin().lock(), control_tx));

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                warn!("Cannot listen for interrupts: {}", e);
                // keep the sender alive so the loop is not stopped
                std::future::pending::<()>().await;
                drop(stop_tx);
            }
        }
    });

    let mut poller = PollingLoop::new(settings.poller_config());
    let result = poller.run(&mut session, tx, control_rx, stop_rx).await;
    session.disconnect();

    let stats = pipeline.await.context("pipeline task panicked")?;
    info!(
        "Logged {} snapshots in {} files, {} UI messages dropped",
        stats.logged, stats.log_sessions, stats.ui_dropped
    );
    if let Err(e) = ui_task.await {
        error!("UI transport task failed: {}", e);
    }

    let polled = result.context("ECU connection lost")?;
    info!(
        "Polled {} cycles, {} snapshots, {} skipped",
        polled.cycles, polled.snapshots, polled.skipped
    );
    Ok(())
}

/// Stand-in for the UI transport: trace what would be pushed
async fn drain_ui(mut rx: mpsc::Receiver<UiMessage>) {
    while let Some(message) = rx.recv().await {
        debug!("UI {:?}: {}", message.action, message.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_emulated() {
        let settings = ReaderSettings {
            emulated: true,
            ..ReaderSettings::default()
        };
        let session = connect(&settings).await.unwrap();
        assert!(session.is_initialized());
        assert!(session.is_emulated());
    }

    #[tokio::test]
    async fn test_connect_missing_port_fails() {
        let settings = ReaderSettings {
            port: "/dev/does-not-exist-mems".to_string(),
            ..ReaderSettings::default()
        };
        let Err(err) = connect(&settings).await else {
            panic!("connecting to a missing port should fail");
        };
        assert!(err.to_string().contains("/dev/does-not-exist-mems"));
    }
}
