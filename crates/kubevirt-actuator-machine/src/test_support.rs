//! Shared fixtures for scope and reconciler tests

use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::Service;
use mockall::mock;

use kubevirt_actuator_client::{worker_service, CredentialsSource, VmClient, VmClientBuilder};
use kubevirt_actuator_common::crd::{
    KubevirtMachineProviderSpec, Machine, MachineSpec, ProviderSpec, VirtualMachine,
    VirtualMachineInstance, VirtualMachineStatus,
};
use kubevirt_actuator_common::{Error, Result};

use crate::patch::{MachinePatcher, MockMachinePatcher};

mock! {
    pub VmClient {}

    #[async_trait::async_trait]
    impl VmClient for VmClient {
        async fn create_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine>;
        async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<Option<VirtualMachine>>;
        async fn get_virtual_machine_instance(&self, namespace: &str, name: &str) -> Result<Option<VirtualMachineInstance>>;
        async fn list_virtual_machines(&self, namespace: &str, label_selector: &str) -> Result<Vec<VirtualMachine>>;
        async fn update_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine>;
        async fn patch_virtual_machine(&self, namespace: &str, name: &str, patch: serde_json::Value) -> Result<VirtualMachine>;
        async fn delete_virtual_machine(&self, namespace: &str, name: &str, grace_period_seconds: u32) -> Result<()>;
        async fn start_virtual_machine(&self, namespace: &str, name: &str) -> Result<()>;
        async fn stop_virtual_machine(&self, namespace: &str, name: &str) -> Result<()>;
        async fn restart_virtual_machine(&self, namespace: &str, name: &str) -> Result<()>;
        async fn create_service(&self, vm_name: &str, namespace: &str) -> Result<Service>;
        async fn delete_service(&self, vm_name: &str, namespace: &str) -> Result<()>;
    }
}

mock! {
    pub CredentialsSource {}

    #[async_trait::async_trait]
    impl CredentialsSource for CredentialsSource {
        async fn kubeconfig(&self, secret_name: &str, namespace: &str) -> Result<Vec<u8>>;
    }
}

mock! {
    pub VmClientBuilder {}

    #[async_trait::async_trait]
    impl VmClientBuilder for VmClientBuilder {
        async fn build(&self, kubeconfig: &[u8]) -> Result<Arc<dyn VmClient>>;
    }
}

pub const KUBECONFIG: &[u8] = b"apiVersion: v1\nkind: Config\n";

pub fn sample_provider_spec() -> KubevirtMachineProviderSpec {
    serde_json::from_value(serde_json::json!({
        "sourcePvcName": "rhcos-4.6",
        "credentialsSecretName": "infra-kubeconfig"
    }))
    .expect("provider spec fixture should decode")
}

/// A Machine in namespace `tenant` with a valid provider spec
pub fn sample_machine(name: &str) -> Machine {
    let mut machine = Machine::new(
        name,
        MachineSpec {
            provider_id: None,
            provider_spec: ProviderSpec {
                value: Some(
                    serde_json::to_value(sample_provider_spec())
                        .expect("provider spec fixture should encode"),
                ),
            },
        },
    );
    machine.metadata.namespace = Some("tenant".to_string());
    machine
}

/// The rendered VM as the remote API would return it
pub fn stored_vm(rendered: &VirtualMachine, uid: &str, ready: bool) -> VirtualMachine {
    let mut vm = rendered.clone();
    vm.metadata.uid = Some(uid.to_string());
    vm.metadata.resource_version = Some("1".to_string());
    vm.status = Some(VirtualMachineStatus {
        created: true,
        ready,
        printable_status: Some(if ready { "Running" } else { "Starting" }.to_string()),
    });
    vm
}

pub fn not_found(name: &str) -> Error {
    Error::not_found("VirtualMachine", name, "tenant")
}

/// Accept the worker Service create that follows a successful create or update
pub fn expect_worker_service(client: &mut MockVmClient) {
    client
        .expect_create_service()
        .returning(|vm, ns| Ok(worker_service(vm, ns)));
}

/// Credentials that always resolve
pub fn credentials_ok() -> MockCredentialsSource {
    let mut credentials = MockCredentialsSource::new();
    credentials
        .expect_kubeconfig()
        .returning(|_, _| Ok(KUBECONFIG.to_vec()));
    credentials
}

/// Builder handing out the given client
pub fn builder_for(client: MockVmClient) -> MockVmClientBuilder {
    let client: Arc<dyn VmClient> = Arc::new(client);
    let mut builder = MockVmClientBuilder::new();
    builder
        .expect_build()
        .returning(move |_| Ok(Arc::clone(&client)));
    builder
}

/// Records every Machine handed to the patcher
///
/// Lets tests assert on what was written without coupling to mock
/// internals.
#[derive(Clone, Default)]
pub struct PatchCapture {
    patches: Arc<Mutex<Vec<Machine>>>,
}

impl PatchCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patcher that records and succeeds
    pub fn patcher(&self) -> Arc<dyn MachinePatcher> {
        self.build_patcher(false)
    }

    /// Patcher that records and then fails
    pub fn failing_patcher(&self) -> Arc<dyn MachinePatcher> {
        self.build_patcher(true)
    }

    fn build_patcher(&self, fail: bool) -> Arc<dyn MachinePatcher> {
        let patches = Arc::clone(&self.patches);
        let mut patcher = MockMachinePatcher::new();
        patcher.expect_patch_machine().returning(move |machine| {
            patches
                .lock()
                .expect("mutex should not be poisoned")
                .push(machine.clone());
            if fail {
                Err(Error::remote("patch Machine", "apiserver unavailable"))
            } else {
                Ok(())
            }
        });
        Arc::new(patcher)
    }

    pub fn count(&self) -> usize {
        self.patches
            .lock()
            .expect("mutex should not be poisoned")
            .len()
    }

    pub fn last(&self) -> Option<Machine> {
        self.patches
            .lock()
            .expect("mutex should not be poisoned")
            .last()
            .cloned()
    }
}
