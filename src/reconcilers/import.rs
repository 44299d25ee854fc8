// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Import controller - runs a kube-runtime Controller over the
//! ServiceAccountImports of one namespace.
//!
//! Only spec and finalizer changes reach the reconciler; status writes are
//! filtered out by the generation predicate. Deletion is handled through a
//! finalizer so the mirrored secret is removed before the import goes away.

use crate::constants::FINALIZER;
use crate::error::ImporterError;
use crate::sync::Reconciler;
use crate::types::{ImportKey, ServiceAccountImport};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use kube::runtime::{
    controller::{Action, Config as ControllerConfig, Controller},
    finalizer::{finalizer, Error as FinalizerError, Event as Finalizer},
    predicates, reflector,
    reflector::ObjectRef,
    watcher, Predicate, WatchStreamExt,
};
use kube::{Api, ResourceExt};
use kube_runtime::watcher::Config as WatcherConfig;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

type ReconcileError = FinalizerError<ImporterError>;

pub struct ImportReconciler {
    reconciler: Arc<Reconciler>,
    namespace: String,
    concurrency: u16,
    trigger_capacity: usize,
}

impl ImportReconciler {
    pub fn new(
        reconciler: Reconciler,
        namespace: impl Into<String>,
        workers: usize,
        trigger_capacity: usize,
    ) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            namespace: namespace.into(),
            concurrency: u16::try_from(workers).unwrap_or(u16::MAX),
            trigger_capacity,
        }
    }

    /// Run until SIGINT or SIGTERM. A second signal aborts in-flight
    /// reconciliations.
    pub async fn run(self) -> anyhow::Result<()> {
        let controller = self.controller().shutdown_on_signal();
        self.drive(controller).await
    }

    /// Run until `shutdown` resolves, then let in-flight reconciliations
    /// finish.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + Sync + 'static,
    ) -> anyhow::Result<()> {
        let controller = self.controller().graceful_shutdown_on(shutdown);
        self.drive(controller).await
    }

    fn controller(&self) -> Controller<ServiceAccountImport> {
        let imports: Api<ServiceAccountImport> =
            Api::namespaced(self.reconciler.client().clone(), &self.namespace);
        let (reader, writer) = reflector::store();
        let stream = watcher(imports, WatcherConfig::default())
            .default_backoff()
            .reflect(writer)
            .applied_objects()
            .predicate_filter(predicates::generation.combine(predicates::finalizers));

        // Bounded: the sweep waits for the controller to take its keys
        let (triggers, pending) = mpsc::channel(self.trigger_capacity);
        tokio::spawn(sweep_orphans(
            self.reconciler.clone(),
            self.namespace.clone(),
            triggers,
        ));

        Controller::for_stream(stream, reader)
            .with_config(ControllerConfig::default().concurrency(self.concurrency))
            .reconcile_on(pending)
    }

    async fn drive(self, controller: Controller<ServiceAccountImport>) -> anyhow::Result<()> {
        info!(
            "Watching ServiceAccountImports in namespace {} with {} workers",
            self.namespace, self.concurrency
        );

        controller
            .run(reconcile, error_policy, self.reconciler)
            .for_each(|result| async move {
                match result {
                    Ok((import, action)) => debug!("Reconciled {}: {:?}", import, action),
                    Err(e) => warn!("Reconcile failed: {}", e),
                }
            })
            .await;

        info!("Import controller stopped");
        Ok(())
    }
}

async fn reconcile(
    import: Arc<ServiceAccountImport>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, ReconcileError> {
    let namespace = import.namespace().unwrap_or_default();
    let imports: Api<ServiceAccountImport> = Api::namespaced(reconciler.client().clone(), &namespace);

    finalizer(&imports, FINALIZER, import, |event| async move {
        match event {
            Finalizer::Apply(import) => reconciler.apply(&import).await,
            Finalizer::Cleanup(import) => reconciler.cleanup(&import).await,
        }
    })
    .await
}

fn error_policy(import: Arc<ServiceAccountImport>, err: &ReconcileError, reconciler: Arc<Reconciler>) -> Action {
    let key = import.key();
    match err {
        FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => reconciler.error_action(&key, e),
        other => {
            warn!("Finalizer update on {} failed: {}", key, other);
            reconciler.error_action(&key, &ImporterError::Unavailable(other.to_string()))
        }
    }
}

/// Tear down secrets of imports deleted while the operator was down and
/// queue the owners that are still declared.
async fn sweep_orphans(
    reconciler: Arc<Reconciler>,
    namespace: String,
    mut triggers: mpsc::Sender<ObjectRef<ServiceAccountImport>>,
) {
    for key in reconciler.sweep_orphans(&namespace).await {
        if triggers.send(object_ref(&key)).await.is_err() {
            debug!("Controller stopped before the startup sweep finished");
            return;
        }
    }
}

fn object_ref(key: &ImportKey) -> ObjectRef<ServiceAccountImport> {
    ObjectRef::new(&key.name).within(&key.namespace)
}
