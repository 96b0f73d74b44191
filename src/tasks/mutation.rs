//! Serializes external mutation notifications into sequential rescans.
//!
//! Upload callbacks, USB eject handling, the filesystem watcher and internal
//! refresh requests all land in one bounded queue drained by one worker, so
//! the collection is never rescanned by two contexts at once. Enqueue never
//! blocks a producer: a full queue drops the message and logs.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::events::MutationEvent;

/// The one operation every mutation collapses into.
pub trait RefreshTarget: Send + Sync {
    fn refresh(&self) -> Result<(), Error>;
}

/// Producer handle. Cheap to clone; all notifications are non-blocking.
#[derive(Clone)]
pub struct MutationQueue {
    tx: mpsc::Sender<MutationEvent>,
}

impl MutationQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MutationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Upload-server callback surface: a file arrived at `path`.
    pub fn notify_file_added(&self, path: PathBuf) {
        info!(path = %path.display(), "file added");
        self.enqueue(MutationEvent::FileAdded(path));
    }

    /// Upload-server callback surface: a file was removed.
    pub fn notify_file_removed(&self) {
        info!("file removed");
        self.enqueue(MutationEvent::FileRemoved);
    }

    pub fn request_refresh(&self) {
        self.enqueue(MutationEvent::Refresh);
    }

    fn enqueue(&self, event: MutationEvent) {
        if self.tx.try_send(event).is_err() {
            warn!("mutation queue full, skipping refresh");
        }
    }
}

/// Single worker draining the queue: one refresh per message, in arrival
/// order, one at a time.
pub async fn run(
    mut rx: mpsc::Receiver<MutationEvent>,
    target: Arc<dyn RefreshTarget>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                info!(?event, "processing mutation");
                let target = Arc::clone(&target);
                match tokio::task::spawn_blocking(move || target.refresh()).await {
                    Ok(Ok(())) => info!("collection refreshed"),
                    Ok(Err(err)) => error!("refresh failed: {err}"),
                    Err(err) => error!("refresh task panicked: {err}"),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingTarget {
        refreshes: AtomicUsize,
    }

    impl RefreshTarget for CountingTarget {
        fn refresh(&self) -> Result<(), Error> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_message_kind_collapses_to_one_refresh() {
        let (queue, rx) = MutationQueue::new(8);
        let target = Arc::new(CountingTarget::default());
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run(rx, target.clone(), cancel.clone()));

        queue.notify_file_added(PathBuf::from("/media/a.jpg"));
        queue.notify_file_removed();
        queue.request_refresh();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while target.refreshes.load(Ordering::SeqCst) < 3
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(target.refreshes.load(Ordering::SeqCst), 3);

        cancel.cancel();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking_the_producer() {
        // No worker draining: capacity 2, third message is dropped.
        let (queue, mut rx) = MutationQueue::new(2);
        queue.request_refresh();
        queue.request_refresh();
        queue.request_refresh();

        assert_eq!(rx.recv().await, Some(MutationEvent::Refresh));
        assert_eq!(rx.recv().await, Some(MutationEvent::Refresh));
        assert!(rx.try_recv().is_err());
    }
}
