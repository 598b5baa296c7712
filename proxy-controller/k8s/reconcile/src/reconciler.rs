use crate::{
    store::{resource_id, PROXY_DEF},
    ControllerMetrics, Error, ResourceId, Store, MANAGED_BY_LABEL,
};
#[cfg(not(test))]
use chrono::offset::Utc;
use proxius_controller_core::{self as core, ConditionType, Reason, SyncState};
use proxius_controller_k8s_api::{
    conditions, ConfigMap, ObjectMeta, ProxyDef, Resource, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Written by `kubectl apply`; describes the ProxyDef rather than its ConfigMap.
const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Converges a ProxyDef's ConfigMap and status with its spec.
#[derive(Debug)]
pub struct Reconciler<S> {
    store: S,
    metrics: ControllerMetrics,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The ProxyDef no longer exists. Its ConfigMap is left to the garbage
    /// collector.
    Deleted,
    /// The ProxyDef was reconciled into the given state.
    Reconciled(SyncState),
}

/// How a status write treats `status.configMapName`.
#[derive(Copy, Clone, Debug)]
enum RecordedName<'n> {
    Keep,
    Set(&'n str),
    Clear,
}

impl<S: Store> Reconciler<S> {
    pub fn new(store: S, metrics: ControllerMetrics) -> Self {
        Self { store, metrics }
    }

    pub async fn reconcile(&self, id: &ResourceId) -> Result<Outcome, Error> {
        let Some(proxy_def) = self.store.get_proxy_def(id).await? else {
            debug!("ProxyDef not found; ignoring since it must have been deleted");
            return Ok(Outcome::Deleted);
        };

        // A degraded ProxyDef keeps its condition until it can be made ready,
        // so that a persistent failure is not rewritten on every reconcile.
        let proxy_def = match proxy_def.sync_state() {
            SyncState::Unknown => match self.start_syncing(proxy_def).await? {
                Some(proxy_def) => proxy_def,
                None => return Ok(Outcome::Deleted),
            },
            _ => proxy_def,
        };

        let desired = desired_config_map(&proxy_def)?;
        let config_map_id = ResourceId::new(
            id.namespace.clone(),
            core::config_map_name(&proxy_def.name_any()),
        );

        let (reason, name) = match self.store.get_config_map(&config_map_id).await? {
            None => {
                let res = self.store.create_config_map(&desired).await;
                self.metrics.config_map_written("create", res.is_ok());
                if let Err(error) = res {
                    warn!(%error, configmap = %config_map_id.name, "Failed to create ConfigMap");
                    return self
                        .fail(proxy_def, Reason::ConfigMapCreationFailed, error)
                        .await;
                }
                info!(configmap = %config_map_id.name, "Created ConfigMap");
                (Reason::ConfigMapCreated, RecordedName::Set(&config_map_id.name))
            }

            Some(current) => {
                if !is_controllable_by(&current, &proxy_def) {
                    warn!(configmap = %config_map_id.name, "ConfigMap is controlled by another resource");
                    return self
                        .record(proxy_def, Reason::ConfigMapNotOwned, RecordedName::Clear)
                        .await
                        .map(|pd| outcome(pd, SyncState::Degraded));
                }

                match converge(current, desired) {
                    Some(updated) => {
                        let res = self.store.replace_config_map(&updated).await;
                        self.metrics.config_map_written("replace", res.is_ok());
                        if let Err(error) = res {
                            warn!(%error, configmap = %config_map_id.name, "Failed to update ConfigMap");
                            return self
                                .fail(proxy_def, Reason::ConfigMapUpdateFailed, error)
                                .await;
                        }
                        info!(configmap = %config_map_id.name, "Updated ConfigMap");
                        (Reason::ConfigMapUpdated, RecordedName::Set(&config_map_id.name))
                    }
                    None => {
                        debug!(configmap = %config_map_id.name, "ConfigMap is up to date");
                        (ready_reason(&proxy_def), RecordedName::Set(&config_map_id.name))
                    }
                }
            }
        };

        let proxy_def = if proxy_def.sync_state() == SyncState::Degraded {
            match self.start_syncing(proxy_def).await? {
                Some(proxy_def) => proxy_def,
                None => return Ok(Outcome::Deleted),
            }
        } else {
            proxy_def
        };
        self.record(proxy_def, reason, name)
            .await
            .map(|pd| outcome(pd, reason.state()))
    }

    async fn start_syncing(&self, proxy_def: ProxyDef) -> Result<Option<ProxyDef>, Error> {
        self.record(proxy_def, Reason::Reconciling, RecordedName::Keep)
            .await
    }

    /// Records a failed write in the ProxyDef's status and returns the write's
    /// error so that the reconciliation is retried.
    async fn fail(
        &self,
        proxy_def: ProxyDef,
        reason: Reason,
        error: Error,
    ) -> Result<Outcome, Error> {
        let name = match reason {
            // Nothing to reference until the ConfigMap exists.
            Reason::ConfigMapCreationFailed => RecordedName::Clear,
            _ => RecordedName::Keep,
        };
        if let Err(status_error) = self.record(proxy_def, reason, name).await {
            warn!(error = %status_error, "Failed to update ProxyDef status");
        }
        Err(error)
    }

    /// Records `reason` in the ProxyDef's status, writing the status only if
    /// it changed.
    ///
    /// Returns the ProxyDef as stored after the write, or `None` if it has
    /// since been deleted.
    async fn record(
        &self,
        mut proxy_def: ProxyDef,
        reason: Reason,
        name: RecordedName<'_>,
    ) -> Result<Option<ProxyDef>, Error> {
        let id = resource_id(PROXY_DEF, &proxy_def)?;
        let state = proxy_def.sync_state().transition(reason.state())?;

        let generation = proxy_def.meta().generation;
        let status = proxy_def.status.get_or_insert_with(Default::default);
        let mut changed = conditions::record(&mut status.conditions, reason, generation, now());
        let name = match name {
            RecordedName::Keep => status.config_map_name.clone(),
            RecordedName::Set(name) => Some(name.to_string()),
            RecordedName::Clear => None,
        };
        if status.config_map_name != name {
            status.config_map_name = name;
            changed = true;
        }
        if !changed {
            return Ok(Some(proxy_def));
        }

        self.store.update_proxy_def_status(&proxy_def).await?;
        self.metrics.status_updated(state);
        debug!(%state, %reason, "Updated ProxyDef status");

        // The status write changed the resource version, so later writes must
        // be based on a fresh copy.
        self.store.get_proxy_def(&id).await
    }
}

fn outcome(proxy_def: Option<ProxyDef>, state: SyncState) -> Outcome {
    match proxy_def {
        Some(_) => Outcome::Reconciled(state),
        None => Outcome::Deleted,
    }
}

/// The reason to record for a ProxyDef whose ConfigMap is already up to date.
/// A Ready ProxyDef keeps the reason it became ready with.
fn ready_reason(proxy_def: &ProxyDef) -> Reason {
    if proxy_def.sync_state() == SyncState::Ready {
        if let Some(reason) = conditions::find(proxy_def.conditions(), ConditionType::Ready)
            .and_then(|c| Reason::parse(&c.reason))
            .filter(|r| r.condition_type() == ConditionType::Ready)
        {
            return reason;
        }
    }
    Reason::ConfigMapSynced
}

/// Builds the ConfigMap described by the ProxyDef's spec.
pub(crate) fn desired_config_map(proxy_def: &ProxyDef) -> Result<ConfigMap, Error> {
    let name = proxy_def.name_any();
    let owner = proxy_def
        .controller_owner_ref(&())
        .ok_or_else(|| Error::MissingMetadata {
            kind: PROXY_DEF,
            name: name.clone(),
            field: "uid",
        })?;

    let mut labels = proxy_def.labels().clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), core::CONTROLLER_NAME.to_string());

    let mut annotations = proxy_def.annotations().clone();
    annotations.remove(LAST_APPLIED_ANNOTATION);

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(core::config_map_name(&name)),
            namespace: proxy_def.namespace(),
            labels: Some(labels),
            annotations: (!annotations.is_empty()).then_some(annotations),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        data: Some(proxy_def.spec.env().into_data()),
        ..Default::default()
    })
}

/// A ConfigMap may be managed by a ProxyDef if it has no controller or if
/// that ProxyDef is its controller.
fn is_controllable_by(config_map: &ConfigMap, proxy_def: &ProxyDef) -> bool {
    match controller_uid(config_map) {
        Some(uid) => proxy_def.uid().as_deref() == Some(uid),
        None => true,
    }
}

fn controller_uid(config_map: &ConfigMap) -> Option<&str> {
    config_map
        .owner_references()
        .iter()
        .find(|r| r.controller == Some(true))
        .map(|r| r.uid.as_str())
}

/// Returns `current` updated to match `desired`, or `None` if it already
/// matches. The stored object's resource version is kept so the update is
/// rejected if the ConfigMap changes in the meantime.
fn converge(mut current: ConfigMap, desired: ConfigMap) -> Option<ConfigMap> {
    let mut changed = false;

    let data = desired.data.unwrap_or_default();
    if current.data.as_ref() != Some(&data) {
        current.data = Some(data);
        changed = true;
    }

    let labels = current.metadata.labels.get_or_insert_with(Default::default);
    changed |= merge_into(labels, desired.metadata.labels);
    if let Some(desired) = desired.metadata.annotations {
        let annotations = current
            .metadata
            .annotations
            .get_or_insert_with(Default::default);
        changed |= merge_into(annotations, Some(desired));
    }

    if controller_uid(&current).is_none() {
        current
            .metadata
            .owner_references
            .get_or_insert_with(Default::default)
            .extend(desired.metadata.owner_references.into_iter().flatten());
        changed = true;
    }

    changed.then_some(current)
}

/// Sets every entry of `desired` in `current`, leaving other keys alone.
/// Returns true if `current` changed.
fn merge_into(
    current: &mut BTreeMap<String, String>,
    desired: Option<BTreeMap<String, String>>,
) -> bool {
    let mut changed = false;
    for (k, v) in desired.into_iter().flatten() {
        if current.get(&k) != Some(&v) {
            current.insert(k, v);
            changed = true;
        }
    }
    changed
}

#[cfg(not(test))]
fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::<chrono::Utc>::MIN_UTC
}
