use crate::k8s::{
    self, api::apps::v1::Deployment, ObjectMeta, OwnerReference, PostParams, Resource,
};
use anyhow::{anyhow, Result};
use k8s_openapi::api::coordination::v1::Lease;
use kubert::lease::{Claim, ClaimParams, LeaseManager};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, info};

/// Guards writes to ProxyDef status and ConfigMaps.
const LEASE_NAME: &str = "proxius-controller-write";

const CLAIM_PARAMS: ClaimParams = ClaimParams {
    lease_duration: Duration::from_secs(30),
    renew_grace_period: Duration::from_secs(1),
};

/// Ensures the write Lease exists in `ns` and contends for it as `hostname`.
///
/// The Lease is owned by the controller's Deployment, so it is deleted along
/// with it.
pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    deployment_name: &str,
    hostname: &str,
) -> Result<watch::Receiver<Arc<Claim>>> {
    let deployment = k8s::Api::<Deployment>::namespaced(runtime.client(), ns)
        .get(deployment_name)
        .await?;
    let owner = deployment
        .controller_owner_ref(&())
        .ok_or_else(|| anyhow!("Deployment {ns}/{deployment_name} has no uid"))?;

    let api = k8s::Api::<Lease>::namespaced(runtime.client(), ns);
    let params = PostParams {
        field_manager: Some(crate::reconcile::FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    if created(api.create(&params, &write_lease(ns, owner)).await)? {
        info!(%ns, name = LEASE_NAME, "Created write Lease");
    } else {
        debug!(%ns, name = LEASE_NAME, "Write Lease already exists");
    }

    let (claims, _task) = LeaseManager::init(api, LEASE_NAME)
        .await?
        .spawn(hostname, CLAIM_PARAMS)
        .await?;
    Ok(claims)
}

fn write_lease(ns: &str, owner: OwnerReference) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            namespace: Some(ns.to_string()),
            labels: Some(
                [
                    ("app.kubernetes.io/name", crate::core::CONTROLLER_NAME),
                    ("app.kubernetes.io/component", "controller"),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: None,
    }
}

/// Returns true if the Lease was created and false if another replica
/// already created it.
fn created(res: Result<Lease, k8s::Error>) -> Result<bool> {
    match res {
        Ok(_) => Ok(true),
        Err(k8s::Error::Api(rsp)) if rsp.code == 409 => Ok(false),
        Err(error) => Err(error.into()),
    }
}
