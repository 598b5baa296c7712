use crate::k8s::{
    api::{
        apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
        batch::v1::{CronJob, Job},
    },
    Pod, PodSpec, Resource,
};
use kube::core::{admission::Operation, DynamicObject};
use serde_json::Value;

/// Names the ProxyDef whose ConfigMap a workload should reference.
pub const PROXY_DEF_ANNOTATION: &str = "proxy.igordc.com/proxydef";

/// The workload kinds whose pods are injected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    Pod,
    Deployment,
    StatefulSet,
    DaemonSet,
    ReplicaSet,
    Job,
    CronJob,
}

/// A workload manifest whose pod spec has been validated.
#[derive(Clone, Debug)]
pub struct Workload {
    kind: WorkloadKind,
    doc: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to encode {kind:?}: {source}")]
    Encode {
        kind: WorkloadKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind:?} has no pod spec at {pointer}")]
    MissingPodSpec {
        kind: WorkloadKind,
        pointer: &'static str,
    },

    #[error("invalid pod spec in {kind:?}: {source}")]
    Decode {
        kind: WorkloadKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON patch does not reproduce the injected {kind:?}")]
    PatchMismatch { kind: WorkloadKind },
}

// === impl WorkloadKind ===

impl WorkloadKind {
    pub fn from_group_kind(group: &str, kind: &str) -> Option<Self> {
        if is_kind::<Pod>(group, kind) {
            return Some(Self::Pod);
        }
        if is_kind::<Deployment>(group, kind) {
            return Some(Self::Deployment);
        }
        if is_kind::<StatefulSet>(group, kind) {
            return Some(Self::StatefulSet);
        }
        if is_kind::<DaemonSet>(group, kind) {
            return Some(Self::DaemonSet);
        }
        if is_kind::<ReplicaSet>(group, kind) {
            return Some(Self::ReplicaSet);
        }
        if is_kind::<Job>(group, kind) {
            return Some(Self::Job);
        }
        if is_kind::<CronJob>(group, kind) {
            return Some(Self::CronJob);
        }
        None
    }

    /// Pods are only injected when they are created, since their containers
    /// cannot change afterwards. Pod templates may also be injected on update.
    pub fn injects_on(&self, op: &Operation) -> bool {
        match op {
            Operation::Create => true,
            Operation::Update => *self != Self::Pod,
            Operation::Delete | Operation::Connect => false,
        }
    }

    /// Locates the pod template within the manifest, if the kind has one.
    fn template_pointer(&self) -> Option<&'static str> {
        match self {
            Self::Pod => None,
            Self::Deployment
            | Self::StatefulSet
            | Self::DaemonSet
            | Self::ReplicaSet
            | Self::Job => Some("/spec/template"),
            Self::CronJob => Some("/spec/jobTemplate/spec/template"),
        }
    }

    fn pod_spec_pointer(&self) -> &'static str {
        match self {
            Self::Pod => "/spec",
            Self::Deployment
            | Self::StatefulSet
            | Self::DaemonSet
            | Self::ReplicaSet
            | Self::Job => "/spec/template/spec",
            Self::CronJob => "/spec/jobTemplate/spec/template/spec",
        }
    }
}

fn is_kind<T>(group: &str, kind: &str) -> bool
where
    T: Resource<DynamicType = ()>,
{
    group.eq_ignore_ascii_case(&T::group(&())) && kind.eq_ignore_ascii_case(&T::kind(&()))
}

// === impl Workload ===

impl Workload {
    pub fn decode(kind: WorkloadKind, obj: &DynamicObject) -> Result<Self, Error> {
        let doc = serde_json::to_value(obj).map_err(|source| Error::Encode { kind, source })?;

        let pointer = kind.pod_spec_pointer();
        let spec = doc
            .pointer(pointer)
            .ok_or(Error::MissingPodSpec { kind, pointer })?;
        serde_json::from_value::<PodSpec>(spec.clone())
            .map_err(|source| Error::Decode { kind, source })?;

        Ok(Self { kind, doc })
    }

    pub fn kind(&self) -> WorkloadKind {
        self.kind
    }

    /// The ProxyDef named by the workload. For controllers the pod template's
    /// annotation takes precedence over the controller's own.
    pub fn proxy_def_name(&self) -> Option<&str> {
        let template = self
            .kind
            .template_pointer()
            .and_then(|p| self.doc.pointer(p))
            .and_then(annotation);
        template.or_else(|| annotation(&self.doc))
    }

    /// Computes a JSON patch that adds a reference to `config_map` to the
    /// `envFrom` of every container. Returns `None` if every container already
    /// references it.
    pub fn inject(&self, config_map: &str) -> Result<Option<json_patch::Patch>, Error> {
        let kind = self.kind;
        let mut injected = self.doc.clone();
        let spec = injected
            .pointer_mut(kind.pod_spec_pointer())
            .ok_or(Error::MissingPodSpec {
                kind,
                pointer: kind.pod_spec_pointer(),
            })?;
        if !add_env_from(spec, config_map) {
            return Ok(None);
        }

        let patch = json_patch::diff(&self.doc, &injected);
        let mut patched = self.doc.clone();
        if json_patch::patch(&mut patched, &patch.0).is_err() || patched != injected {
            return Err(Error::PatchMismatch { kind });
        }
        Ok(Some(patch))
    }
}

fn annotation(obj: &Value) -> Option<&str> {
    obj.get("metadata")?
        .get("annotations")?
        .get(PROXY_DEF_ANNOTATION)?
        .as_str()
        .filter(|name| !name.is_empty())
}

/// Appends a `configMapRef` to each container's `envFrom` unless one already
/// refers to `config_map`. Returns true if any container changed.
fn add_env_from(spec: &mut Value, config_map: &str) -> bool {
    let mut changed = false;
    for field in ["initContainers", "containers"] {
        let Some(containers) = spec.get_mut(field).and_then(Value::as_array_mut) else {
            continue;
        };
        for container in containers.iter_mut().filter_map(Value::as_object_mut) {
            let env_from = container
                .entry("envFrom")
                .or_insert_with(|| Value::Array(vec![]));
            if env_from.is_null() {
                *env_from = Value::Array(vec![]);
            }
            let Some(env_from) = env_from.as_array_mut() else {
                continue;
            };

            let present = env_from.iter().any(|source| {
                source.pointer("/configMapRef/name").and_then(Value::as_str) == Some(config_map)
            });
            if !present {
                env_from.push(serde_json::json!({ "configMapRef": { "name": config_map } }));
                changed = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn workload(kind: WorkloadKind, doc: Value) -> Workload {
        let obj = serde_json::from_value::<DynamicObject>(doc).unwrap();
        Workload::decode(kind, &obj).unwrap()
    }

    fn apply(workload: &Workload, patch: &json_patch::Patch) -> Value {
        let mut doc = workload.doc.clone();
        json_patch::patch(&mut doc, &patch.0).unwrap();
        doc
    }

    #[test]
    fn recognizes_workload_kinds() {
        assert_eq!(
            WorkloadKind::from_group_kind("", "Pod"),
            Some(WorkloadKind::Pod)
        );
        assert_eq!(
            WorkloadKind::from_group_kind("apps", "Deployment"),
            Some(WorkloadKind::Deployment)
        );
        assert_eq!(
            WorkloadKind::from_group_kind("batch", "CronJob"),
            Some(WorkloadKind::CronJob)
        );
        assert_eq!(WorkloadKind::from_group_kind("", "Deployment"), None);
        assert_eq!(WorkloadKind::from_group_kind("", "Service"), None);
    }

    #[test]
    fn pods_are_injected_only_on_create() {
        assert!(WorkloadKind::Pod.injects_on(&Operation::Create));
        assert!(!WorkloadKind::Pod.injects_on(&Operation::Update));
        assert!(WorkloadKind::Deployment.injects_on(&Operation::Update));
        assert!(!WorkloadKind::Deployment.injects_on(&Operation::Delete));
    }

    #[test]
    fn injects_every_container() {
        let pod = workload(
            WorkloadKind::Pod,
            json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "name": "web", "namespace": "ns" },
                "spec": {
                    "initContainers": [{ "name": "init", "image": "busybox" }],
                    "containers": [
                        { "name": "app", "image": "nginx" },
                        {
                            "name": "sidecar",
                            "image": "envoy",
                            "envFrom": [{ "secretRef": { "name": "creds" } }],
                        },
                    ],
                },
            }),
        );

        let patch = pod.inject("default-config").unwrap().expect("must patch");
        let patched = apply(&pod, &patch);
        let reference = json!({ "configMapRef": { "name": "default-config" } });
        assert_eq!(
            patched.pointer("/spec/initContainers/0/envFrom").unwrap(),
            &json!([reference])
        );
        assert_eq!(
            patched.pointer("/spec/containers/0/envFrom").unwrap(),
            &json!([reference])
        );
        assert_eq!(
            patched.pointer("/spec/containers/1/envFrom").unwrap(),
            &json!([{ "secretRef": { "name": "creds" } }, reference])
        );
    }

    #[test]
    fn injection_is_idempotent() {
        let pod = workload(
            WorkloadKind::Pod,
            json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "name": "web" },
                "spec": {
                    "containers": [{
                        "name": "app",
                        "envFrom": [{ "configMapRef": { "name": "default-config" } }],
                    }],
                },
            }),
        );
        assert!(pod.inject("default-config").unwrap().is_none());
        assert!(pod.inject("other-config").unwrap().is_some());
    }

    #[test]
    fn injects_cron_job_template() {
        let cron = workload(
            WorkloadKind::CronJob,
            json!({
                "apiVersion": "batch/v1",
                "kind": "CronJob",
                "metadata": { "name": "report" },
                "spec": {
                    "schedule": "@hourly",
                    "jobTemplate": {
                        "spec": {
                            "template": {
                                "metadata": {
                                    "annotations": { "proxy.igordc.com/proxydef": "egress" },
                                },
                                "spec": { "containers": [{ "name": "report" }] },
                            },
                        },
                    },
                },
            }),
        );
        assert_eq!(cron.proxy_def_name(), Some("egress"));

        let patch = cron.inject("egress-config").unwrap().expect("must patch");
        assert_eq!(
            apply(&cron, &patch)
                .pointer("/spec/jobTemplate/spec/template/spec/containers/0/envFrom")
                .unwrap(),
            &json!([{ "configMapRef": { "name": "egress-config" } }])
        );
    }

    #[test]
    fn template_annotation_wins() {
        let deploy = workload(
            WorkloadKind::Deployment,
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {
                    "name": "web",
                    "annotations": { "proxy.igordc.com/proxydef": "outer" },
                },
                "spec": {
                    "selector": {},
                    "template": {
                        "metadata": { "annotations": { "proxy.igordc.com/proxydef": "inner" } },
                        "spec": { "containers": [{ "name": "app" }] },
                    },
                },
            }),
        );
        assert_eq!(deploy.proxy_def_name(), Some("inner"));

        let pod = workload(
            WorkloadKind::Pod,
            json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "name": "web" },
                "spec": { "containers": [{ "name": "app" }] },
            }),
        );
        assert_eq!(pod.proxy_def_name(), None);
    }

    #[test]
    fn rejects_invalid_pod_specs() {
        let missing = serde_json::from_value::<DynamicObject>(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web" },
            "spec": { "replicas": 1 },
        }))
        .unwrap();
        assert!(matches!(
            Workload::decode(WorkloadKind::Deployment, &missing),
            Err(Error::MissingPodSpec { .. })
        ));

        let invalid = serde_json::from_value::<DynamicObject>(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web" },
            "spec": { "containers": "app" },
        }))
        .unwrap();
        assert!(matches!(
            Workload::decode(WorkloadKind::Pod, &invalid),
            Err(Error::Decode { .. })
        ));
    }
}
