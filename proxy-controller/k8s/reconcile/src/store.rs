use crate::{Error, ResourceId, FIELD_MANAGER};
use proxius_controller_k8s_api::{self as k8s, ConfigMap, ProxyDef, ResourceExt};

pub(crate) const PROXY_DEF: &str = "ProxyDef";
pub(crate) const CONFIG_MAP: &str = "ConfigMap";

/// The cluster state the reconciler reads and writes.
///
/// Reads return `None` when the object does not exist. Every write of an
/// existing object carries the resource version it was read at and fails with
/// [`Error::Conflict`] if the stored object has moved on since.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn get_proxy_def(&self, id: &ResourceId) -> Result<Option<ProxyDef>, Error>;

    /// Writes the ProxyDef's status subresource.
    async fn update_proxy_def_status(&self, proxy_def: &ProxyDef) -> Result<(), Error>;

    async fn get_config_map(&self, id: &ResourceId) -> Result<Option<ConfigMap>, Error>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), Error>;

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<(), Error>;
}

/// A [`Store`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: k8s::Client,
}

pub(crate) fn resource_id<K: ResourceExt>(
    kind: &'static str,
    obj: &K,
) -> Result<ResourceId, Error> {
    let name = obj.name_any();
    let namespace = obj.namespace().ok_or_else(|| Error::MissingMetadata {
        kind,
        name: name.clone(),
        field: "namespace",
    })?;
    Ok(ResourceId::new(namespace, name))
}

fn resource_version<K: ResourceExt>(kind: &'static str, obj: &K) -> Result<String, Error> {
    obj.resource_version().ok_or_else(|| Error::MissingMetadata {
        kind,
        name: obj.name_any(),
        field: "resourceVersion",
    })
}

/// The merge patch that writes a ProxyDef's status.
///
/// The patch carries the resource version, so the server rejects it unless
/// that version is still current. Every status field is written explicitly:
/// a merge patch leaves absent keys untouched, so a cleared field is sent as
/// `null`.
pub(crate) fn status_patch(proxy_def: &ProxyDef) -> Result<serde_json::Value, Error> {
    let status = proxy_def.status.clone().unwrap_or_default();
    Ok(serde_json::json!({
        "metadata": {
            "resourceVersion": resource_version(PROXY_DEF, proxy_def)?,
        },
        "status": {
            "conditions": status.conditions,
            "configMapName": status.config_map_name,
        },
    }))
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }

    fn proxy_defs(&self, ns: &str) -> k8s::Api<ProxyDef> {
        k8s::Api::namespaced(self.client.clone(), ns)
    }

    fn config_maps(&self, ns: &str) -> k8s::Api<ConfigMap> {
        k8s::Api::namespaced(self.client.clone(), ns)
    }

    fn post_params() -> k8s::PostParams {
        k8s::PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get_proxy_def(&self, id: &ResourceId) -> Result<Option<ProxyDef>, Error> {
        self.proxy_defs(&id.namespace)
            .get_opt(&id.name)
            .await
            .map_err(|e| Error::from_api("get", PROXY_DEF, id, e))
    }

    async fn update_proxy_def_status(&self, proxy_def: &ProxyDef) -> Result<(), Error> {
        let id = resource_id(PROXY_DEF, proxy_def)?;
        let patch = status_patch(proxy_def)?;
        let params = k8s::PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.proxy_defs(&id.namespace)
            .patch_status(&id.name, &params, &k8s::Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_api("update status of", PROXY_DEF, &id, e))?;
        Ok(())
    }

    async fn get_config_map(&self, id: &ResourceId) -> Result<Option<ConfigMap>, Error> {
        self.config_maps(&id.namespace)
            .get_opt(&id.name)
            .await
            .map_err(|e| Error::from_api("get", CONFIG_MAP, id, e))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
        let id = resource_id(CONFIG_MAP, config_map)?;
        self.config_maps(&id.namespace)
            .create(&Self::post_params(), config_map)
            .await
            .map_err(|e| Error::from_api("create", CONFIG_MAP, &id, e))?;
        Ok(())
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
        let id = resource_id(CONFIG_MAP, config_map)?;
        // Replacing without a resource version would skip the server's
        // conflict check.
        resource_version(CONFIG_MAP, config_map)?;
        self.config_maps(&id.namespace)
            .replace(&id.name, &Self::post_params(), config_map)
            .await
            .map_err(|e| Error::from_api("replace", CONFIG_MAP, &id, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proxius_controller_k8s_api::{ObjectMeta, ProxyDefStatus};
    use serde_json::json;

    fn proxy_def(config_map_name: Option<&str>) -> ProxyDef {
        ProxyDef {
            metadata: ObjectMeta {
                name: Some("default".to_string()),
                namespace: Some("ns".to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            spec: Default::default(),
            status: Some(ProxyDefStatus {
                conditions: vec![],
                config_map_name: config_map_name.map(Into::into),
            }),
        }
    }

    #[test]
    fn status_patch_sets_config_map_name() {
        assert_eq!(
            status_patch(&proxy_def(Some("default-config"))).unwrap(),
            json!({
                "metadata": { "resourceVersion": "7" },
                "status": { "conditions": [], "configMapName": "default-config" },
            })
        );
    }

    #[test]
    fn status_patch_clears_config_map_name() {
        assert_eq!(
            status_patch(&proxy_def(None)).unwrap(),
            json!({
                "metadata": { "resourceVersion": "7" },
                "status": { "conditions": [], "configMapName": null },
            })
        );
    }

    #[test]
    fn status_patch_requires_resource_version() {
        let mut pd = proxy_def(None);
        pd.metadata.resource_version = None;
        assert!(matches!(
            status_patch(&pd),
            Err(Error::MissingMetadata {
                field: "resourceVersion",
                ..
            })
        ));
    }
}
