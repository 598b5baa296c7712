pub use proxius_controller_core as core;
pub use proxius_controller_k8s_api as k8s;
pub use proxius_controller_k8s_reconcile as reconcile;

mod admission;
mod args;
mod injection;
mod lease;

pub use self::{
    admission::{Admission, AdmissionMetrics, ProxyDefLookup},
    args::Args,
};
