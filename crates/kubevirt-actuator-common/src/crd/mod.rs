//! Resource types consumed and produced by the actuator
//!
//! - [`Machine`]: the machine-api resource being reconciled
//! - [`KubevirtMachineProviderSpec`] / [`KubevirtMachineProviderStatus`]: the
//!   provider payloads embedded in a Machine
//! - [`VirtualMachine`] / [`VirtualMachineInstance`]: the remote KubeVirt objects

mod machine;
mod provider;
mod virtual_machine;

pub use machine::{Machine, MachineSpec, MachineStatus, ProviderSpec};
pub use provider::{
    ConditionStatus, KubevirtMachineProviderCondition, KubevirtMachineProviderSpec,
    KubevirtMachineProviderStatus, MachineCondition, ProviderConditionType,
    MACHINE_CREATION_FAILED, MACHINE_CREATION_SUCCEEDED,
};
pub use virtual_machine::{
    CloudInitNoCloudSource, Cpu, DataVolumeRef, DataVolumeSource, DataVolumeSourcePvc,
    DataVolumeSpec, DataVolumeTemplateSpec, Devices, Disk, DiskTarget, DomainSpec, Interface,
    InterfaceBinding, Memory, MultusNetwork, Network, PodNetwork, SecretRef, VirtualMachine,
    VirtualMachineInstance, VirtualMachineInstanceSpec, VirtualMachineInstanceStatus,
    VirtualMachineInstanceTemplateSpec, VirtualMachineSpec, VirtualMachineStatus, Volume,
};
