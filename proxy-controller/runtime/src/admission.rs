use crate::{
    injection::{self, Workload, WorkloadKind},
    k8s::{self, ProxyDef},
};
use anyhow::Result;
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::DynamicObject;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, trace, warn};


/// Injects a reference to a namespace's proxy ConfigMap into the pods of
/// admitted workloads.
#[derive(Clone)]
pub struct Admission<L = k8s::Client> {
    lookup: L,
    proxy_def_name: Arc<str>,
    lookup_timeout: Duration,
    metrics: AdmissionMetrics,
}

/// Finds the ProxyDef that governs a namespace.
#[async_trait::async_trait]
pub trait ProxyDefLookup: Clone + Send + Sync + 'static {
    async fn proxy_def(&self, ns: &str, name: &str) -> Result<Option<ProxyDef>>;
}

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    decisions: Family<DecisionLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct DecisionLabels {
    decision: &'static str,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl<L: ProxyDefLookup> tower::Service<Request<hyper::body::Incoming>> for Admission<L> {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(not_found()));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    admission.metrics.decided("invalid");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    admission.metrics.decided("invalid");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl<L: ProxyDefLookup> Admission<L> {
    pub fn new(
        lookup: L,
        proxy_def_name: impl Into<Arc<str>>,
        lookup_timeout: Duration,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            lookup,
            proxy_def_name: proxy_def_name.into(),
            lookup_timeout,
            metrics,
        }
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);

        let Some(kind) = WorkloadKind::from_group_kind(&req.kind.group, &req.kind.kind) else {
            return self.deny(
                rsp,
                400,
                format_args!(
                    "unsupported resource type: {}.{}.{}",
                    req.kind.group, req.kind.version, req.kind.kind
                ),
            );
        };
        if !kind.injects_on(&req.operation) {
            return self.allow(
                rsp,
                "skipped",
                format_args!("{kind:?} {:?} is not injected", req.operation),
            );
        }
        let Some(obj) = req.object.as_ref() else {
            return self.deny(rsp, 400, "admission request missing 'object'");
        };
        let workload = match Workload::decode(kind, obj) {
            Ok(workload) => workload,
            Err(error) => {
                info!(%error, "Failed to decode {kind:?}");
                return self.deny(rsp, error_code(&error), error);
            }
        };

        let Some(ns) = req.namespace.clone().or_else(|| obj.metadata.namespace.clone()) else {
            return self.allow(rsp, "skipped", "request has no namespace; no ProxyDef applies");
        };
        let name = workload
            .proxy_def_name()
            .unwrap_or(&self.proxy_def_name)
            .to_string();

        let lookup = self.lookup.proxy_def(&ns, &name);
        let proxy_def = match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(Some(proxy_def))) => proxy_def,
            Ok(Ok(None)) => {
                return self.allow(
                    rsp,
                    "skipped",
                    format_args!("ProxyDef {ns}/{name} not found; workload left unmodified"),
                );
            }
            Ok(Err(error)) => {
                warn!(%error, %ns, %name, "Failed to look up ProxyDef");
                return self.deny(
                    rsp,
                    500,
                    format_args!("failed to look up ProxyDef {ns}/{name}: {error}"),
                );
            }
            Err(_) => {
                warn!(%ns, %name, timeout = ?self.lookup_timeout, "ProxyDef lookup timed out");
                return self.deny(
                    rsp,
                    500,
                    format_args!("timed out looking up ProxyDef {ns}/{name}"),
                );
            }
        };

        let Some(config_map) = proxy_def.recorded_config_map_name() else {
            return self.allow(
                rsp,
                "skipped",
                format_args!("ProxyDef {ns}/{name} has not recorded a ConfigMap yet"),
            );
        };

        let patch = match workload.inject(config_map) {
            Ok(Some(patch)) => patch,
            Ok(None) => {
                return self.allow(
                    rsp,
                    "unchanged",
                    format_args!("all containers already reference ConfigMap {config_map}"),
                );
            }
            Err(error) => {
                warn!(%error, %ns, "Failed to compute injection patch");
                return self.deny(rsp, error_code(&error), error);
            }
        };

        match rsp.clone().with_patch(patch) {
            Ok(rsp) => {
                info!(%ns, name = %req.name, kind = ?workload.kind(), %config_map, "Injected proxy environment");
                self.metrics.decided("patched");
                rsp
            }
            Err(error) => {
                warn!(%error, "Failed to serialize patch");
                self.deny(rsp, 500, format_args!("failed to serialize patch: {error}"))
            }
        }
    }

    fn allow(
        &self,
        mut rsp: AdmissionResponse,
        decision: &'static str,
        reason: impl std::fmt::Display,
    ) -> AdmissionResponse {
        debug!(%reason, "Allowed without changes");
        self.metrics.decided(decision);
        rsp.result.message = reason.to_string();
        rsp
    }

    fn deny(
        &self,
        rsp: AdmissionResponse,
        code: u16,
        reason: impl std::fmt::Display,
    ) -> AdmissionResponse {
        self.metrics.decided("denied");
        let mut rsp = rsp.deny(reason);
        rsp.result.code = code;
        rsp
    }
}

fn error_code(error: &injection::Error) -> u16 {
    match error {
        injection::Error::MissingPodSpec { .. } | injection::Error::Decode { .. } => 400,
        injection::Error::PatchMismatch { .. } => 409,
        injection::Error::Encode { .. } => 500,
    }
}

fn not_found() -> Response<Body> {
    let mut rsp = Response::new(Body::default());
    *rsp.status_mut() = http::StatusCode::NOT_FOUND;
    rsp
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    let mut rsp = Response::new(Body::from(bytes));
    rsp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    Ok(rsp)
}

#[async_trait::async_trait]
impl ProxyDefLookup for k8s::Client {
    async fn proxy_def(&self, ns: &str, name: &str) -> Result<Option<ProxyDef>> {
        let proxy_def = k8s::Api::<ProxyDef>::namespaced(self.clone(), ns)
            .get_opt(name)
            .await?;
        Ok(proxy_def)
    }
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let decisions = Family::<DecisionLabels, Counter>::default();
        reg.register(
            "decisions",
            "Count of admission reviews by decision",
            decisions.clone(),
        );
        Self { decisions }
    }

    fn decided(&self, decision: &'static str) {
        self.decisions
            .get_or_create(&DecisionLabels { decision })
            .inc();
    }
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
