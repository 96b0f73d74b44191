//! Driver task: the single consumer of controller requests.
//!
//! Slideshow ticks, video finish timers and gesture events all funnel here
//! and are applied to the album one at a time on the blocking pool; the
//! album's transition mutex does the serialization, this task keeps timer
//! and input contexts from ever touching playback state directly.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::album::Album;
use crate::error::Error;
use crate::events::ControllerRequest;

pub async fn run(
    album: Arc<Album>,
    mut requests: mpsc::Receiver<ControllerRequest>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting control task");
                break;
            }
            request = requests.recv() => {
                let Some(request) = request else { break };
                debug!(?request, "controller request");
                let album = Arc::clone(&album);
                let outcome =
                    tokio::task::spawn_blocking(move || album.handle_request(request)).await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(Error::NoMedia)) => warn!("no playable media"),
                    Ok(Err(err)) => warn!("request failed: {err}"),
                    Err(err) => warn!("request task panicked: {err}"),
                }
            }
        }
    }
    Ok(())
}
