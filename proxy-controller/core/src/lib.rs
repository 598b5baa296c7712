#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod condition;
pub mod env;

pub use self::{
    condition::{ConditionStatus, ConditionType, InvalidTransition, Reason, SyncState},
    env::ProxyEnv,
};

pub const CONTROLLER_NAME: &str = "proxius";

/// The suffix appended to a ProxyDef's name to name the ConfigMap it owns.
pub const CONFIG_MAP_SUFFIX: &str = "-config";

/// Returns the name of the ConfigMap materialized for the named ProxyDef.
pub fn config_map_name(proxy_def: &str) -> String {
    format!("{proxy_def}{CONFIG_MAP_SUFFIX}")
}
