//! Rendering a VirtualMachine from a Machine
//!
//! The output depends only on the Machine and its provider spec, so two
//! renders of the same Machine compare equal.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, VolumeResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use kubevirt_actuator_common::crd::{
    CloudInitNoCloudSource, Cpu, DataVolumeRef, DataVolumeSource, DataVolumeSourcePvc,
    DataVolumeSpec, DataVolumeTemplateSpec, Devices, Disk, DiskTarget, DomainSpec, Interface,
    InterfaceBinding, KubevirtMachineProviderSpec, Machine, Memory, MultusNetwork, Network,
    PodNetwork, SecretRef, VirtualMachine, VirtualMachineInstanceSpec,
    VirtualMachineInstanceTemplateSpec, VirtualMachineSpec, Volume,
};
use kubevirt_actuator_common::{
    service_name, Error, Result, CLUSTER_ID_LABEL, SERVICE_SELECTOR_LABEL, VM_NAME_LABEL,
};

const BOOT_DISK: &str = "bootdisk";
const CLOUD_INIT_DISK: &str = "cloudinitdisk";
const DEFAULT_NETWORK: &str = "default";
const VIRTIO_BUS: &str = "virtio";

/// Name of the DataVolume holding the VM boot disk
pub fn boot_volume_name(vm_name: &str) -> String {
    format!("{}-bootvolume", vm_name)
}

/// Render the VirtualMachine backing a Machine
///
/// The VM takes the Machine's name and namespace. Fails with
/// [`Error::InvalidConfiguration`] when either is missing or when the
/// provider spec names no source PVC.
pub fn render_virtual_machine(
    machine: &Machine,
    spec: &KubevirtMachineProviderSpec,
) -> Result<VirtualMachine> {
    let name = machine
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::invalid_configuration("machine has no name"))?;
    let namespace = machine
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| Error::invalid_configuration_for(&name, "machine has no namespace"))?;
    if spec.source_pvc_name.is_empty() {
        return Err(Error::invalid_configuration_for(
            &name,
            "providerSpec.sourcePvcName is empty",
        ));
    }

    let labels = vm_labels(machine, &name);
    let boot_volume = boot_volume_name(&name);

    Ok(VirtualMachine {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: VirtualMachineSpec {
            running: Some(true),
            data_volume_templates: vec![boot_volume_template(spec, &boot_volume, &namespace)],
            template: VirtualMachineInstanceTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: instance_spec(spec, &boot_volume),
            },
        },
        status: None,
    })
}

fn vm_labels(machine: &Machine, name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (VM_NAME_LABEL.to_string(), name.to_string()),
        (SERVICE_SELECTOR_LABEL.to_string(), service_name(name)),
    ]);
    if let Some(cluster) = machine
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(CLUSTER_ID_LABEL))
    {
        labels.insert(CLUSTER_ID_LABEL.to_string(), cluster.clone());
    }
    labels
}

fn boot_volume_template(
    spec: &KubevirtMachineProviderSpec,
    boot_volume: &str,
    namespace: &str,
) -> DataVolumeTemplateSpec {
    DataVolumeTemplateSpec {
        metadata: ObjectMeta {
            name: Some(boot_volume.to_string()),
            ..Default::default()
        },
        spec: DataVolumeSpec {
            pvc: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec![spec.pvc_access_mode.clone()]),
                storage_class_name: spec.storage_class_name.clone(),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(spec.requested_storage.clone()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            source: Some(DataVolumeSource {
                pvc: Some(DataVolumeSourcePvc {
                    namespace: spec
                        .source_pvc_namespace
                        .clone()
                        .unwrap_or_else(|| namespace.to_string()),
                    name: spec.source_pvc_name.clone(),
                }),
            }),
        },
    }
}

fn instance_spec(
    spec: &KubevirtMachineProviderSpec,
    boot_volume: &str,
) -> VirtualMachineInstanceSpec {
    let mut disks = vec![virtio_disk(BOOT_DISK)];
    let mut volumes = vec![Volume {
        name: BOOT_DISK.to_string(),
        data_volume: Some(DataVolumeRef {
            name: boot_volume.to_string(),
        }),
        cloud_init_no_cloud: None,
    }];

    if let Some(secret) = &spec.ignition_secret_name {
        disks.push(virtio_disk(CLOUD_INIT_DISK));
        volumes.push(Volume {
            name: CLOUD_INIT_DISK.to_string(),
            data_volume: None,
            cloud_init_no_cloud: Some(CloudInitNoCloudSource {
                user_data_secret_ref: Some(SecretRef {
                    name: secret.clone(),
                }),
            }),
        });
    }

    let (interface, network) = match &spec.network_name {
        Some(network_name) => (
            Interface {
                name: DEFAULT_NETWORK.to_string(),
                bridge: Some(InterfaceBinding {}),
                masquerade: None,
            },
            Network {
                name: DEFAULT_NETWORK.to_string(),
                pod: None,
                multus: Some(MultusNetwork {
                    network_name: network_name.clone(),
                }),
            },
        ),
        None => (
            Interface {
                name: DEFAULT_NETWORK.to_string(),
                bridge: None,
                masquerade: Some(InterfaceBinding {}),
            },
            Network {
                name: DEFAULT_NETWORK.to_string(),
                pod: Some(PodNetwork {}),
                multus: None,
            },
        ),
    };

    VirtualMachineInstanceSpec {
        domain: DomainSpec {
            cpu: Some(Cpu {
                cores: spec.requested_cpu,
            }),
            memory: Some(Memory {
                guest: Quantity(spec.requested_memory.clone()),
            }),
            devices: Devices {
                disks,
                interfaces: vec![interface],
            },
        },
        networks: vec![network],
        volumes,
        termination_grace_period_seconds: None,
    }
}

fn virtio_disk(name: &str) -> Disk {
    Disk {
        name: name.to_string(),
        disk: Some(DiskTarget {
            bus: VIRTIO_BUS.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubevirt_actuator_common::crd::{MachineSpec, ProviderSpec};

    fn provider_spec() -> KubevirtMachineProviderSpec {
        serde_json::from_value(serde_json::json!({
            "sourcePvcName": "rhcos-4.6",
            "credentialsSecretName": "infra-kubeconfig"
        }))
        .unwrap()
    }

    fn machine(name: &str, namespace: Option<&str>) -> Machine {
        let mut machine = Machine::new(
            name,
            MachineSpec {
                provider_id: None,
                provider_spec: ProviderSpec {
                    value: Some(serde_json::to_value(provider_spec()).unwrap()),
                },
            },
        );
        machine.metadata.namespace = namespace.map(str::to_string);
        machine
    }

    #[test]
    fn renders_identity_and_labels() {
        let mut m = machine("worker-0", Some("tenant"));
        m.metadata.labels = Some(BTreeMap::from([(
            CLUSTER_ID_LABEL.to_string(),
            "cluster-a".to_string(),
        )]));

        let vm = render_virtual_machine(&m, &provider_spec()).unwrap();
        assert_eq!(vm.metadata.name.as_deref(), Some("worker-0"));
        assert_eq!(vm.metadata.namespace.as_deref(), Some("tenant"));
        assert_eq!(vm.spec.running, Some(true));

        let labels = vm.metadata.labels.unwrap();
        assert_eq!(labels[VM_NAME_LABEL], "worker-0");
        assert_eq!(labels[SERVICE_SELECTOR_LABEL], "worker-worker-0");
        assert_eq!(labels[CLUSTER_ID_LABEL], "cluster-a");
    }

    #[test]
    fn rendering_is_deterministic() {
        let m = machine("worker-0", Some("tenant"));
        let a = render_virtual_machine(&m, &provider_spec()).unwrap();
        let b = render_virtual_machine(&m, &provider_spec()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn boot_volume_clones_source_pvc_from_machine_namespace() {
        let vm = render_virtual_machine(&machine("worker-0", Some("tenant")), &provider_spec())
            .unwrap();

        let template = &vm.spec.data_volume_templates[0];
        assert_eq!(template.metadata.name.as_deref(), Some("worker-0-bootvolume"));
        let source = template.spec.source.as_ref().unwrap().pvc.as_ref().unwrap();
        assert_eq!(source.name, "rhcos-4.6");
        assert_eq!(source.namespace, "tenant");

        let pvc = template.spec.pvc.as_ref().unwrap();
        assert_eq!(pvc.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        let requests = pvc.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests["storage"], Quantity("35Gi".to_string()));
    }

    #[test]
    fn explicit_source_namespace_wins() {
        let mut spec = provider_spec();
        spec.source_pvc_namespace = Some("images".to_string());
        let vm = render_virtual_machine(&machine("worker-0", Some("tenant")), &spec).unwrap();
        let source = vm.spec.data_volume_templates[0]
            .spec
            .source
            .as_ref()
            .unwrap()
            .pvc
            .as_ref()
            .unwrap();
        assert_eq!(source.namespace, "images");
    }

    #[test]
    fn pod_network_uses_masquerade() {
        let vm = render_virtual_machine(&machine("worker-0", Some("tenant")), &provider_spec())
            .unwrap();
        let instance = &vm.spec.template.spec;
        assert!(instance.domain.devices.interfaces[0].masquerade.is_some());
        assert!(instance.networks[0].pod.is_some());
        assert_eq!(instance.domain.cpu.as_ref().unwrap().cores, 4);
        assert_eq!(
            instance.domain.memory.as_ref().unwrap().guest,
            Quantity("2048M".to_string())
        );
    }

    #[test]
    fn multus_network_uses_bridge() {
        let mut spec = provider_spec();
        spec.network_name = Some("tenant-net".to_string());
        let vm = render_virtual_machine(&machine("worker-0", Some("tenant")), &spec).unwrap();
        let instance = &vm.spec.template.spec;
        assert!(instance.domain.devices.interfaces[0].bridge.is_some());
        assert_eq!(
            instance.networks[0].multus.as_ref().unwrap().network_name,
            "tenant-net"
        );
    }

    #[test]
    fn ignition_secret_adds_cloud_init_disk() {
        let mut spec = provider_spec();
        spec.ignition_secret_name = Some("worker-user-data".to_string());
        let vm = render_virtual_machine(&machine("worker-0", Some("tenant")), &spec).unwrap();
        let instance = &vm.spec.template.spec;

        assert_eq!(instance.domain.devices.disks.len(), 2);
        let cloud_init = instance
            .volumes
            .iter()
            .find(|v| v.name == CLOUD_INIT_DISK)
            .and_then(|v| v.cloud_init_no_cloud.as_ref())
            .unwrap();
        assert_eq!(
            cloud_init.user_data_secret_ref.as_ref().unwrap().name,
            "worker-user-data"
        );
    }

    #[test]
    fn missing_namespace_is_invalid_configuration() {
        let err = render_virtual_machine(&machine("worker-0", None), &provider_spec()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration { ref machine, .. } if machine == "worker-0"));
    }

    #[test]
    fn empty_source_pvc_is_invalid_configuration() {
        let mut spec = provider_spec();
        spec.source_pvc_name.clear();
        let err = render_virtual_machine(&machine("worker-0", Some("tenant")), &spec).unwrap_err();
        assert!(err.to_string().contains("sourcePvcName"));
    }
}
