use crate::{
    store::{resource_id, PROXY_DEF},
    Backoff, ControllerMetrics, Error, KubeStore, Outcome, Reconciler, Store, MANAGED_BY_LABEL,
};
use futures::prelude::*;
use kube::runtime::{
    controller::{self, Action},
    watcher,
};
use kubert::lease::Claim;
use proxius_controller_core::CONTROLLER_NAME;
use proxius_controller_k8s_api::{self as k8s, ConfigMap, ProxyDef};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, info_span, warn, Instrument};

/// How long a replica that doesn't hold the write lease waits before checking
/// a ProxyDef again.
pub(crate) const STANDBY_REQUEUE: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct Params {
    /// How often every ProxyDef is reconciled even without changes.
    pub resync: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

/// Drives the [`Reconciler`] from a watch on ProxyDefs and the ConfigMaps
/// they own.
///
/// Only the replica holding the write lease reconciles; the others keep their
/// caches warm and requeue.
pub struct Controller<S = KubeStore> {
    reconciler: Reconciler<S>,
    backoff: Backoff,
    resync: Duration,
    claims: watch::Receiver<Arc<Claim>>,
    name: String,
    metrics: ControllerMetrics,
}

// === impl Controller ===

impl Controller {
    pub fn new(
        client: k8s::Client,
        params: Params,
        claims: watch::Receiver<Arc<Claim>>,
        name: String,
        metrics: ControllerMetrics,
    ) -> Self {
        Self::with_store(KubeStore::new(client), params, claims, name, metrics)
    }

    /// Runs until the watches terminate.
    pub async fn run(self, client: k8s::Client) {
        let owned = watcher::Config::default()
            .labels(&format!("{MANAGED_BY_LABEL}={CONTROLLER_NAME}"));
        controller::Controller::new(
            k8s::Api::<ProxyDef>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(k8s::Api::<ConfigMap>::all(client), owned)
        .run(
            reconcile::<KubeStore>,
            error_policy::<KubeStore>,
            Arc::new(self),
        )
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(%obj, ?action, "Reconciled"),
                // Already reported by the error policy.
                Err(controller::Error::ReconcilerFailed(_, obj)) => {
                    debug!(%obj, "Reconciliation failed")
                }
                Err(error) => warn!(%error, "Controller error"),
            }
        })
        .await
    }
}

impl<S: Store> Controller<S> {
    pub(crate) fn with_store(
        store: S,
        params: Params,
        claims: watch::Receiver<Arc<Claim>>,
        name: String,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(store, metrics.clone()),
            backoff: Backoff::new(params.backoff_base, params.backoff_max),
            resync: params.resync,
            claims,
            name,
            metrics,
        }
    }

    fn is_leader(&self) -> bool {
        self.claims.borrow().is_current_for(&self.name)
    }
}

pub(crate) async fn reconcile<S: Store>(
    proxy_def: Arc<ProxyDef>,
    ctx: Arc<Controller<S>>,
) -> Result<Action, Error> {
    let id = resource_id(PROXY_DEF, proxy_def.as_ref())?;
    if !ctx.is_leader() {
        debug!(%id, "Not the leader; skipping");
        return Ok(Action::requeue(STANDBY_REQUEUE.min(ctx.resync)));
    }

    let span = info_span!("reconcile", ns = %id.namespace, name = %id.name);
    match ctx.reconciler.reconcile(&id).instrument(span).await {
        Ok(outcome) => {
            ctx.backoff.reset(&id);
            match outcome {
                Outcome::Deleted => {
                    ctx.metrics.reconciled("deleted");
                    Ok(Action::await_change())
                }
                Outcome::Reconciled(state) => {
                    debug!(%id, %state, "Reconciled ProxyDef");
                    ctx.metrics.reconciled("ok");
                    Ok(Action::requeue(ctx.resync))
                }
            }
        }
        Err(error) => {
            ctx.metrics
                .reconciled(if error.is_conflict() { "conflict" } else { "error" });
            Err(error)
        }
    }
}

pub(crate) fn error_policy<S: Store>(
    proxy_def: Arc<ProxyDef>,
    error: &Error,
    ctx: Arc<Controller<S>>,
) -> Action {
    let Ok(id) = resource_id(PROXY_DEF, proxy_def.as_ref()) else {
        warn!(%error, "Failed to reconcile ProxyDef");
        return Action::requeue(ctx.backoff.max());
    };
    let delay = ctx.backoff.failed(&id);
    if error.is_conflict() {
        // Another writer got there first; retry against fresh state.
        debug!(%id, %error, ?delay, "ProxyDef reconciliation conflicted");
    } else {
        warn!(%id, %error, ?delay, "Failed to reconcile ProxyDef");
    }
    Action::requeue(delay)
}
