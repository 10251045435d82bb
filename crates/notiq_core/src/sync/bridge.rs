//! Remote-change bridge into the view context.
//!
//! # Invariants
//! - Each notification is merged through `ManagedContext::perform`, so it is
//!   serialized with local saves on the view context.
//! - The worker exits once its subscription is dropped.

use super::RemoteChangeNotification;
use crate::store::{ManagedContext, MergeSummary, RecordStore};
use log::{info, warn};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Callback run on the bridge thread after each merge.
pub type MergeHook = Box<dyn Fn(&RemoteChangeNotification, MergeSummary) + Send + 'static>;

/// Listens for remote-change notifications and merges them into the view
/// context. The published notes snapshot is left untouched; callers that
/// want fresh data refresh explicitly (for example from a `MergeHook`).
pub struct ChangeNotificationBridge {
    store: RecordStore,
    subscription_id: u64,
    merged: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl ChangeNotificationBridge {
    pub fn start(store: &RecordStore) -> io::Result<Self> {
        Self::spawn(store, None)
    }

    pub fn start_with_hook(store: &RecordStore, hook: MergeHook) -> io::Result<Self> {
        Self::spawn(store, Some(hook))
    }

    fn spawn(store: &RecordStore, hook: Option<MergeHook>) -> io::Result<Self> {
        let subscription = store.subscribe_remote_changes();
        let subscription_id = subscription.id;
        let receiver = subscription.receiver;
        let context: ManagedContext = store.view_context().clone();
        let merged = Arc::new(AtomicU64::new(0));
        let merged_counter = Arc::clone(&merged);

        let spawned = thread::Builder::new()
            .name("notiq-remote-merge".to_string())
            .spawn(move || {
                for notification in receiver {
                    let summary = context.merge_changes(&notification.change_set);
                    merged_counter.fetch_add(1, Ordering::AcqRel);
                    info!(
                        "event=remote_merge module=sync status=ok context_id={} cloud_container={} changes={} refreshed={} invalidated={}",
                        context.id(),
                        notification.cloud_container_id.as_deref().unwrap_or("none"),
                        notification.change_set.len(),
                        summary.refreshed,
                        summary.invalidated
                    );
                    if let Some(hook) = hook.as_ref() {
                        hook(&notification, summary);
                    }
                }
            });

        let worker = match spawned {
            Ok(worker) => worker,
            Err(err) => {
                store.unsubscribe_remote_changes(subscription_id);
                return Err(err);
            }
        };

        Ok(Self {
            store: store.clone(),
            subscription_id,
            merged,
            worker: Some(worker),
        })
    }

    /// Number of notifications merged so far.
    pub fn merged_count(&self) -> u64 {
        self.merged.load(Ordering::Acquire)
    }

    /// Unsubscribes and waits for in-flight notifications to finish merging.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.store.unsubscribe_remote_changes(self.subscription_id);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("event=remote_merge module=sync status=error error=worker_panicked");
            }
        }
    }
}

impl Drop for ChangeNotificationBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
