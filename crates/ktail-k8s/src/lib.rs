//! Kubernetes client for ktail
//!
//! This crate defines the pod and log sources the controller consumes and implements them
//! on top of the Kubernetes API.

mod client;
mod convert;
mod kube_source;
mod source;
mod watch;

pub use client::KubeClient;
pub use convert::pod_info;
pub use kube_source::KubeSource;
pub use source::{LogRequest, LogSource, LogStream, PodSource, SourceError};
pub use watch::PodEventMapper;

// Re-export types that are used in our public API
pub use ktail_types::{
    ContainerSpec, ContainerState, ContainerStatus, NamespaceScope, PodEvent, PodInfo, PodPhase,
};
