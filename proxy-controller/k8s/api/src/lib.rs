#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod conditions;
pub mod proxy_def;

pub use self::proxy_def::{ProxyDef, ProxyDefSpec, ProxyDefStatus};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{ConfigMap, Pod, PodSpec},
    },
    apimachinery::{
        self,
        pkg::apis::meta::v1::{Condition, OwnerReference, Time},
    },
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, PostParams, Resource, ResourceExt},
    Client, Error,
};
