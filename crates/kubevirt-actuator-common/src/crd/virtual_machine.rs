//! KubeVirt VirtualMachine and VirtualMachineInstance (kubevirt.io/v1)
//!
//! Only the fields the actuator renders or reads are modelled. KubeVirt owns
//! these CRDs, so schema generation is disabled.

use k8s_openapi::api::core::v1::PersistentVolumeClaimSpec;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Desired state of a KubeVirt VirtualMachine
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachine",
    namespaced,
    status = "VirtualMachineStatus",
    schema = "disabled",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Whether the VM should be running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,

    /// DataVolumes created alongside the VM
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_volume_templates: Vec<DataVolumeTemplateSpec>,

    /// Template for the VirtualMachineInstance
    #[serde(default)]
    pub template: VirtualMachineInstanceTemplateSpec,
}

/// Observed state of a VirtualMachine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// A VirtualMachineInstance exists for this VM
    #[serde(default)]
    pub created: bool,

    /// The VirtualMachineInstance is running and ready
    #[serde(default)]
    pub ready: bool,

    /// Human-readable state (e.g., Provisioning, Starting, Running, Stopped)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,
}

impl VirtualMachine {
    /// Whether the remote side reports the VM ready
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Printable status, if the VM has one yet
    pub fn printable_status(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.printable_status.as_deref())
    }
}

/// DataVolume created from the VM spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DataVolumeTemplateSpec {
    /// DataVolume metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// DataVolume spec
    pub spec: DataVolumeSpec,
}

/// DataVolume spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DataVolumeSpec {
    /// PVC backing the DataVolume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<PersistentVolumeClaimSpec>,

    /// Where the DataVolume content comes from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DataVolumeSource>,
}

/// DataVolume content source
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DataVolumeSource {
    /// Clone from an existing PVC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<DataVolumeSourcePvc>,
}

/// Existing PVC to clone
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DataVolumeSourcePvc {
    /// PVC namespace
    #[serde(default)]
    pub namespace: String,
    /// PVC name
    pub name: String,
}

/// Template for VirtualMachineInstances created by the VM
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct VirtualMachineInstanceTemplateSpec {
    /// Instance metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,

    /// Instance spec
    #[serde(default)]
    pub spec: VirtualMachineInstanceSpec,
}

/// Desired state of a VirtualMachineInstance
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    namespaced,
    status = "VirtualMachineInstanceStatus",
    schema = "disabled",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    /// Virtual hardware
    #[serde(default)]
    pub domain: DomainSpec,

    /// Networks the interfaces attach to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,

    /// Volumes backing the disks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Grace period for guest shutdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

/// Observed state of a VirtualMachineInstance
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    /// Lifecycle phase (Pending, Scheduling, Scheduled, Running, Succeeded, Failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Node the instance runs on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

/// Virtual hardware of an instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DomainSpec {
    /// CPU topology
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,

    /// Memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,

    /// Attached devices
    #[serde(default)]
    pub devices: Devices,
}

/// CPU topology
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Cpu {
    /// Number of cores
    #[serde(default)]
    pub cores: u32,
}

/// Guest memory
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Memory {
    /// Memory visible to the guest
    #[serde(default)]
    pub guest: Quantity,
}

/// Devices attached to the domain
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Devices {
    /// Disks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    /// Network interfaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
}

/// A disk, backed by the volume with the same name
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Disk {
    /// Disk and volume name
    pub name: String,

    /// Disk target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskTarget>,
}

/// Disk bus
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DiskTarget {
    /// Bus type (virtio, sata, scsi)
    #[serde(default)]
    pub bus: String,
}

/// A network interface, attached to the network with the same name
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Interface {
    /// Interface and network name
    pub name: String,

    /// Bridge binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<InterfaceBinding>,

    /// Masquerade (NAT) binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masquerade: Option<InterfaceBinding>,
}

/// Empty marker object selecting an interface binding
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct InterfaceBinding {}

/// A network an interface attaches to
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Network {
    /// Network name
    pub name: String,

    /// The pod network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodNetwork>,

    /// A multus network attachment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multus: Option<MultusNetwork>,
}

/// Empty marker object selecting the pod network
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PodNetwork {}

/// Multus network attachment
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultusNetwork {
    /// NetworkAttachmentDefinition name
    pub network_name: String,
}

/// A volume backing a disk
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume and disk name
    pub name: String,

    /// DataVolume source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<DataVolumeRef>,

    /// cloud-init NoCloud source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitNoCloudSource>,
}

/// Reference to a DataVolume by name
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DataVolumeRef {
    /// DataVolume name
    pub name: String,
}

/// cloud-init NoCloud user data
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloudSource {
    /// Secret holding the user data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret_ref: Option<SecretRef>,
}

/// Reference to a Secret in the VM namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
}
