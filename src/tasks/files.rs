//! Filesystem watcher bridged into the mutation queue.
//!
//! The notify callback runs on the watcher's own thread; events are pushed
//! over a channel and mapped to add/remove notifications here, which the
//! mutation worker then serializes into rescans like every other producer.

use std::path::PathBuf;

use anyhow::Result;
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::collection::{self, MediaKind};
use crate::tasks::mutation::MutationQueue;

pub async fn run(
    library: PathBuf,
    mutations: MutationQueue,
    cancel: CancellationToken,
) -> Result<()> {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Result<Event>>(128);
    let mut watcher = recommended_watcher(move |res| {
        let _ = watch_tx.blocking_send(res);
    })?;
    watcher.watch(&library, RecursiveMode::Recursive)?;
    info!(watching = %library.display(), "library watcher initialized");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting watcher task");
                break;
            }
            res = watch_rx.recv() => {
                let Some(res) = res else { break };
                match res {
                    Ok(event) => handle_event(event, &mutations),
                    Err(err) => error!("watch error: {err}"),
                }
            }
        }
    }
    Ok(())
}

fn handle_event(event: Event, mutations: &MutationQueue) {
    match &event.kind {
        EventKind::Create(CreateKind::File) => {
            for path in event.paths.into_iter().filter(|p| is_media(p)) {
                debug!(path = %path.display(), "fs: add");
                mutations.notify_file_added(path);
            }
        }
        EventKind::Remove(RemoveKind::File) => {
            for path in event.paths.into_iter().filter(|p| is_media(p)) {
                debug!(path = %path.display(), "fs: remove");
                mutations.notify_file_removed();
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Renames may be reported as a bare name change; decide per-path
            // by existence.
            for path in event.paths.into_iter().filter(|p| is_media(p)) {
                if path.exists() {
                    debug!(path = %path.display(), "fs: add (rename)");
                    mutations.notify_file_added(path);
                } else {
                    debug!(path = %path.display(), "fs: remove (rename)");
                    mutations.notify_file_removed();
                }
            }
        }
        _ => {
            debug!(kind = ?event.kind, "fs: ignored");
        }
    }
}

fn is_media(path: &std::path::Path) -> bool {
    collection::classify(path) != MediaKind::Unknown
}
