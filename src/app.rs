use log::{info, warn};
use tokio::runtime;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

use crate::config::io::ConfigIO;
use crate::device::btle::BtleTransport;
use crate::device::constants::joint_name;
use crate::device::session::Session;
use crate::device::transport::event_channel;
use crate::error::AppRunError;

async fn run_session() -> Result<(), AppRunError> {
    let config = ConfigIO::new()?.read().await?;

    let (sink, events) = event_channel();
    let transport = BtleTransport::new(sink).await?;

    let session = Session::spawn(config, transport, events);
    let mut updates = session.subscribe();

    if let Err(err) = session.request_scan().await {
        warn!("Could not start scanning: {}", err);
        session.shutdown().await;
        return Err(err.into());
    }

    'mainloop: loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!("Failed to listen for Ctrl-C: {}", err);
                }
                info!("Interrupted");
                break 'mainloop;
            },
            update = updates.recv() => match update {
                Ok(update) => {
                    let angles: Vec<String> = update.mirror.joint_angles
                        .iter()
                        .map(|(joint, angle)| format!("{} {}°", joint_name(joint), angle))
                        .collect();
                    info!("{} [{}]", update.status_line(), angles.join(", "));
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Skipped {} session updates", skipped);
                },
                Err(RecvError::Closed) => break 'mainloop,
            },
        }
    }

    session.shutdown().await;
    Ok(())
}

pub fn run_application() -> Result<(), AppRunError> {
    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_session())
}
