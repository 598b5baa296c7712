use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use proxius_controller_core::SyncState;

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    reconciles: Family<ResultLabels, Counter>,
    status_updates: Family<StateLabels, Counter>,
    config_map_writes: Family<WriteLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ResultLabels {
    result: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct StateLabels {
    state: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct WriteLabels {
    op: &'static str,
    result: &'static str,
}

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<ResultLabels, Counter>::default();
        reg.register(
            "reconciles",
            "Count of ProxyDef reconciliations by result",
            reconciles.clone(),
        );

        let status_updates = Family::<StateLabels, Counter>::default();
        reg.register(
            "status_updates",
            "Count of ProxyDef status writes by the state recorded",
            status_updates.clone(),
        );

        let config_map_writes = Family::<WriteLabels, Counter>::default();
        reg.register(
            "config_map_writes",
            "Count of ConfigMap writes by operation and result",
            config_map_writes.clone(),
        );

        Self {
            reconciles,
            status_updates,
            config_map_writes,
        }
    }

    pub(crate) fn reconciled(&self, result: &'static str) {
        self.reconciles
            .get_or_create(&ResultLabels { result })
            .inc();
    }

    pub(crate) fn status_updated(&self, state: SyncState) {
        let state = match state {
            SyncState::Unknown => "unknown",
            SyncState::Syncing => "syncing",
            SyncState::Ready => "ready",
            SyncState::Degraded => "degraded",
        };
        self.status_updates.get_or_create(&StateLabels { state }).inc();
    }

    pub(crate) fn config_map_written(&self, op: &'static str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.config_map_writes
            .get_or_create(&WriteLabels { op, result })
            .inc();
    }
}

impl Default for ControllerMetrics {
    /// Metrics that aren't registered anywhere.
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
