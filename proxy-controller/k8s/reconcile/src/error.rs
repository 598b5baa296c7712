use crate::ResourceId;
use proxius_controller_core::InvalidTransition;
use proxius_controller_k8s_api as k8s;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The write carried a resource version that is no longer current. The
    /// object must be read again before the write is retried.
    #[error("{kind} {id} was modified concurrently: {source}")]
    Conflict {
        kind: &'static str,
        id: ResourceId,
        #[source]
        source: k8s::Error,
    },

    #[error("failed to {verb} {kind} {id}: {source}")]
    Api {
        verb: &'static str,
        kind: &'static str,
        id: ResourceId,
        #[source]
        source: k8s::Error,
    },

    #[error("{kind} {name} is missing metadata.{field}")]
    MissingMetadata {
        kind: &'static str,
        name: String,
        field: &'static str,
    },

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl Error {
    /// Classifies an API error. Version mismatches (and creates racing with
    /// another writer) are reported by the API server as 409s.
    pub(crate) fn from_api(
        verb: &'static str,
        kind: &'static str,
        id: &ResourceId,
        source: k8s::Error,
    ) -> Self {
        match &source {
            k8s::Error::Api(rsp) if rsp.code == 409 => Self::Conflict {
                kind,
                id: id.clone(),
                source,
            },
            _ => Self::Api {
                verb,
                kind,
                id: id.clone(),
                source,
            },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
