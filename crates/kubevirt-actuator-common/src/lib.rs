//! Common types for the KubeVirt machine actuator: resources, errors, configuration

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use config::ActuatorConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every write the actuator makes
pub const FIELD_MANAGER: &str = "kubevirt-actuator";

/// Scheme of the provider IDs written onto Machines
pub const PROVIDER_ID_SCHEME: &str = "kubevirt://";

/// Secret key holding the infra cluster kubeconfig
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Prefix of the Service exposing a worker VM
pub const SERVICE_NAME_PREFIX: &str = "worker-";

/// Label carrying the VM name on rendered VMs
pub const VM_NAME_LABEL: &str = "kubevirt.io/vm";

/// Label selected by the worker Service
pub const SERVICE_SELECTOR_LABEL: &str = "name";

/// Machine label carrying the cluster the machine belongs to
pub const CLUSTER_ID_LABEL: &str = "machine.openshift.io/cluster-api-cluster";

/// Machine annotation mirroring the VM printable status
pub const INSTANCE_STATE_ANNOTATION: &str = "machine.openshift.io/instance-state";

/// Machine label describing the VM shape
pub const INSTANCE_TYPE_LABEL: &str = "machine.openshift.io/instance-type";

/// Machine annotation with the provider ID read back from the VM
pub const PROVIDER_ID_ANNOTATION: &str = "kubevirt.io/provider-id";

/// Build the provider ID for a VM
pub fn provider_id(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", PROVIDER_ID_SCHEME, namespace, name)
}

/// Name of the Service exposing the given VM
pub fn service_name(vm_name: &str) -> String {
    format!("{}{}", SERVICE_NAME_PREFIX, vm_name)
}
