use crate::conditions;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use proxius_controller_core::{ProxyEnv, SyncState};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Describes the proxy settings to be exported to the workloads of a
/// namespace.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema,
)]
#[kube(
    group = "proxy.igordc.com",
    version = "v1alpha1",
    kind = "ProxyDef",
    status = "ProxyDefStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDefSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,

    // Accepted and stored, but not yet exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy_cidrs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftp_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_proxy_hosts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_detect: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDefStatus {
    /// Observations of the ProxyDef's convergence. Types are `Ready`,
    /// `Syncing`, and `Degraded`.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// The ConfigMap last materialized from this ProxyDef. Workloads are
    /// injected with a reference to this ConfigMap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,
}

// === impl ProxyDefSpec ===

impl ProxyDefSpec {
    pub fn env(&self) -> ProxyEnv {
        ProxyEnv::new(
            self.http_proxy.as_deref(),
            self.https_proxy.as_deref(),
            self.no_proxy.as_deref(),
        )
    }
}

// === impl ProxyDef ===

impl ProxyDef {
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn sync_state(&self) -> SyncState {
        conditions::sync_state(self.conditions())
    }

    /// The name of the ConfigMap recorded by the controller, if any.
    pub fn recorded_config_map_name(&self) -> Option<&str> {
        self.status.as_ref()?.config_map_name.as_deref()
    }
}
