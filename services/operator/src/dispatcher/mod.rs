//! Dispatcher.
//!
//! Turns store watch events into work items and runs them on a pool of
//! workers:
//! - a change to a resource queues its own reconcile and its owner's
//! - deleting a resource queues a garbage-collection check for each child
//! - a reconcile that asks for a requeue is re-queued after the delay
//! - a failed reconcile is retried with exponential backoff
//!
//! Reconcilers are registered explicitly by the composition root.

mod index;
mod queue;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use gridop_api::{ObjectMeta, ResourceKey, ResourceKind};
use gridop_reconcile::{
    BackoffPolicy, ReconcileOutcome, RetryTracker, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WINDOW,
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::Reconciler;
use crate::error::ControllerResult;
use crate::store::{ResourceStore, StoreResult, WatchEvent};

pub use index::OwnerIndex;
pub use queue::WorkQueue;

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkItem {
    /// Run the registered reconciler for the key's kind.
    Reconcile(ResourceKey),
    /// Delete the resource if its owner no longer exists.
    Collect(ResourceKey),
}

impl WorkItem {
    pub fn key(&self) -> &ResourceKey {
        match self {
            Self::Reconcile(key) | Self::Collect(key) => key,
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconcile(key) => write!(f, "reconcile:{key}"),
            Self::Collect(key) => write!(f, "collect:{key}"),
        }
    }
}

/// Routes work to reconcilers.
pub struct Dispatcher {
    store: Arc<dyn ResourceStore>,
    reconcilers: HashMap<ResourceKind, Arc<dyn Reconciler>>,
    queue: Arc<WorkQueue>,
    index: Mutex<OwnerIndex>,
    retries: Mutex<RetryTracker>,
    backoff: BackoffPolicy,
    workers: usize,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ResourceStore>, workers: usize) -> Self {
        Self {
            store,
            reconcilers: HashMap::new(),
            queue: Arc::new(WorkQueue::new()),
            index: Mutex::new(OwnerIndex::new()),
            retries: Mutex::new(RetryTracker::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WINDOW)),
            backoff: BackoffPolicy::default(),
            workers: workers.max(1),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Register the reconciler for its kind, replacing any earlier one.
    pub fn register(&mut self, reconciler: Arc<dyn Reconciler>) {
        self.reconcilers.insert(reconciler.kind(), reconciler);
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Children of `owner` known to the index.
    pub fn children_of(&self, owner: &ResourceKey) -> Vec<ResourceKey> {
        self.index
            .lock()
            .map(|index| index.children(owner))
            .unwrap_or_default()
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(workers = self.workers, "Starting dispatcher");

        // Subscribe before the initial listing so no change is missed.
        let events = self.store.watch();

        if let Err(e) = self.resync().await {
            error!(error = %e, "initial resync failed");
        }

        let mut handles = Vec::with_capacity(self.workers + 1);
        handles.push(tokio::spawn({
            let dispatcher = Arc::clone(&self);
            let shutdown = shutdown.clone();
            async move { dispatcher.pump(events, shutdown).await }
        }));
        for worker in 0..self.workers {
            let dispatcher = Arc::clone(&self);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                dispatcher.work(worker, shutdown).await
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "dispatcher task panicked");
            }
        }
        info!("Dispatcher stopped");
    }

    /// Queue every cluster and role, and check every owned resource.
    /// Failure counts older than the retry window are dropped.
    pub async fn resync(&self) -> StoreResult<()> {
        if let Ok(mut retries) = self.retries.lock() {
            retries.prune();
        }

        let clusters = self.store.list_clusters().await?;
        let roles = self.store.list_roles(None, &Default::default()).await?;
        let workloads = self.store.list_workloads().await?;
        let services = self.store.list_services().await?;

        let owned = roles
            .iter()
            .map(|r| (&r.metadata, ResourceKind::Role))
            .chain(workloads.iter().map(|w| (&w.metadata, ResourceKind::Workload)))
            .chain(services.iter().map(|s| (&s.metadata, ResourceKind::Service)));
        for (meta, kind) in owned {
            let key = ResourceKey::new(kind, meta.namespace.clone(), meta.name.clone());
            if let Some(owner) = owner_key(meta) {
                if let Ok(mut index) = self.index.lock() {
                    index.insert(owner, key.clone());
                }
                self.queue.add(WorkItem::Collect(key.clone()));
            }
            if self.reconcilers.contains_key(&kind) {
                self.queue.add(WorkItem::Reconcile(key));
            }
        }

        for cluster in clusters {
            self.queue.add(WorkItem::Reconcile(ResourceKey::new(
                ResourceKind::Cluster,
                cluster.metadata.namespace,
                cluster.metadata.name,
            )));
        }

        debug!(queued = self.queue.len(), "resync complete");
        Ok(())
    }

    async fn pump(
        &self,
        mut events: broadcast::Receiver<WatchEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => self.route(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "watch lagged, resyncing");
                        if let Err(e) = self.resync().await {
                            error!(error = %e, "resync failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("watch closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Turn a watch event into work items.
    pub fn route(&self, event: WatchEvent) {
        match event {
            WatchEvent::Applied { key, owner } => {
                if let Some(owner) = &owner {
                    let new_child = self
                        .index
                        .lock()
                        .map(|mut index| index.insert(owner.clone(), key.clone()))
                        .unwrap_or(false);
                    // A child first seen after its owner was deleted would
                    // otherwise never be collected.
                    if new_child {
                        self.queue.add(WorkItem::Collect(key.clone()));
                    }
                }
                self.enqueue_reconcile(key);
                if let Some(owner) = owner {
                    self.enqueue_reconcile(owner);
                }
            }
            WatchEvent::Deleted { key, owner } => {
                let children = self
                    .index
                    .lock()
                    .map(|mut index| {
                        index.remove(&key);
                        index.children(&key)
                    })
                    .unwrap_or_default();
                for child in children {
                    self.queue.add(WorkItem::Collect(child));
                }
                self.enqueue_reconcile(key);
                if let Some(owner) = owner {
                    self.enqueue_reconcile(owner);
                }
            }
        }
    }

    fn enqueue_reconcile(&self, key: ResourceKey) {
        if self.reconcilers.contains_key(&key.kind) {
            self.queue.add(WorkItem::Reconcile(key));
        }
    }

    async fn work(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            let item = tokio::select! {
                item = self.queue.next() => match item {
                    Some(item) => item,
                    None => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let result = self.process(&item).await;
            self.queue.done(&item);
            self.finish(worker, item, result);
        }
    }

    /// Run one work item.
    pub async fn process(&self, item: &WorkItem) -> ControllerResult<ReconcileOutcome> {
        match item {
            WorkItem::Reconcile(key) => match self.reconcilers.get(&key.kind) {
                Some(reconciler) => reconciler.reconcile(&key.object_key()).await,
                None => Ok(ReconcileOutcome::Done),
            },
            WorkItem::Collect(key) => self.collect(key).await,
        }
    }

    fn finish(
        &self,
        worker: usize,
        item: WorkItem,
        result: ControllerResult<ReconcileOutcome>,
    ) {
        let retry_key = item.to_string();
        match result {
            Ok(outcome) => {
                if let Ok(mut retries) = self.retries.lock() {
                    retries.clear(&retry_key);
                }
                if let Some(delay) = outcome.requeue_delay() {
                    debug!(worker, item = %item, delay_ms = delay.as_millis() as u64, "requeue");
                    self.queue.add_after(item, delay);
                }
            }
            Err(e) => {
                let (attempt, exhausted) = self
                    .retries
                    .lock()
                    .map(|mut retries| {
                        let attempt = retries.record_failure(&retry_key);
                        (attempt, retries.is_exhausted(&retry_key))
                    })
                    .unwrap_or((1, false));
                let delay = self.backoff.delay(attempt);
                if exhausted {
                    error!(worker, item = %item, attempt, error = %e, "reconcile keeps failing");
                } else {
                    warn!(worker, item = %item, attempt, delay_ms = delay.as_millis() as u64, error = %e, "reconcile failed, retrying");
                }
                self.queue.add_after(item, delay);
            }
        }
    }

    /// Delete `key` if its owner is gone or has been replaced.
    async fn collect(&self, key: &ResourceKey) -> ControllerResult<ReconcileOutcome> {
        let Some(meta) = self.fetch_meta(key).await? else {
            return Ok(ReconcileOutcome::Done);
        };
        let Some(owner_ref) = meta.owner.as_ref() else {
            return Ok(ReconcileOutcome::Done);
        };
        let Some(owner) = owner_key(&meta) else {
            return Ok(ReconcileOutcome::Done);
        };

        let orphaned = match self.fetch_meta(&owner).await? {
            None => true,
            Some(owner_meta) => owner_ref.uid.is_some() && owner_ref.uid != owner_meta.uid,
        };
        if !orphaned {
            return Ok(ReconcileOutcome::Done);
        }

        let object_key = key.object_key();
        let deleted = match key.kind {
            ResourceKind::Role => self.store.delete_role(&object_key).await,
            ResourceKind::Workload => self.store.delete_workload(&object_key).await,
            ResourceKind::Service => self.store.delete_service(&object_key).await,
            ResourceKind::Cluster => Ok(()),
        };
        match deleted {
            Ok(()) => info!(key = %key, owner = %owner, "collected orphan"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(ReconcileOutcome::Done)
    }

    async fn fetch_meta(&self, key: &ResourceKey) -> StoreResult<Option<ObjectMeta>> {
        let object_key = key.object_key();
        Ok(match key.kind {
            ResourceKind::Cluster => self
                .store
                .get_cluster(&object_key)
                .await?
                .map(|c| c.metadata),
            ResourceKind::Role => self.store.get_role(&object_key).await?.map(|r| r.metadata),
            ResourceKind::Workload => self
                .store
                .get_workload(&object_key)
                .await?
                .map(|w| w.metadata),
            ResourceKind::Service => self
                .store
                .get_service(&object_key)
                .await?
                .map(|s| s.metadata),
        })
    }
}

fn owner_key(meta: &ObjectMeta) -> Option<ResourceKey> {
    meta.owner
        .as_ref()
        .map(|owner| ResourceKey::new(owner.kind, meta.namespace.clone(), owner.name.clone()))
}
