#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backoff;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod resource_id;
mod store;


pub use self::{
    backoff::Backoff,
    controller::{Controller, Params},
    error::Error,
    metrics::ControllerMetrics,
    reconciler::{Outcome, Reconciler},
    resource_id::ResourceId,
    store::{KubeStore, Store},
};

/// Identifies proxius as the writer of the objects it manages.
pub const FIELD_MANAGER: &str = "proxius-controller";

/// Labels every ConfigMap materialized by the controller.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
