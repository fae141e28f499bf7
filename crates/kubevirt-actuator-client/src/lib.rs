//! Access to the remote KubeVirt VM API
//!
//! - [`VmClient`]: the operations the actuator performs against the infra
//!   cluster, implemented over kube-rs by [`KubevirtClient`]
//! - [`CredentialsSource`]: where the infra kubeconfig comes from
//! - [`VmClientBuilder`]: turns a kubeconfig into a ready [`VmClient`]

#![deny(missing_docs)]

mod builder;
mod credentials;
mod vm;

pub use builder::{
    KubeconfigClientBuilder, VmClientBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
};
pub use credentials::{resolve_kubeconfig, CredentialsSource, SecretCredentials};
pub use vm::{worker_service, KubevirtClient, VmClient, VIRTUAL_MACHINE_KIND};

