//! Composition root.
//!
//! Builds the reconcilers from configuration and collaborators and
//! registers them with the dispatcher.

use std::sync::Arc;

use gridop_reconcile::BackoffPolicy;
use tokio::sync::watch;

use crate::config::Config;
use crate::controller::{ClusterReconciler, Context, RoleReconciler};
use crate::dispatcher::Dispatcher;
use crate::events::EventRecorder;
use crate::health::ClusterHealth;
use crate::store::ResourceStore;

/// The assembled operator.
pub struct Operator {
    dispatcher: Dispatcher,
}

impl Operator {
    pub fn new(
        config: &Config,
        store: Arc<dyn ResourceStore>,
        recorder: Arc<dyn EventRecorder>,
        health: Arc<dyn ClusterHealth>,
    ) -> Self {
        let ctx = Context::new(
            Arc::clone(&store),
            recorder,
            health,
            config.controller_settings(),
        );

        let mut dispatcher = Dispatcher::new(store, config.workers);
        dispatcher.register(Arc::new(ClusterReconciler::new(ctx.clone())));
        dispatcher.register(Arc::new(RoleReconciler::new(ctx)));

        Self { dispatcher }
    }

    /// Override the retry backoff for failed reconciles.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.dispatcher = self.dispatcher.with_backoff(backoff);
        self
    }

    pub fn into_dispatcher(self) -> Arc<Dispatcher> {
        Arc::new(self.dispatcher)
    }

    /// Run until shutdown is signaled.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        self.into_dispatcher().run(shutdown).await;
    }
}
