//! Per-operation Machine scope
//!
//! A scope is built once per reconcile call. It holds the Machine being
//! reconciled, the VM rendered from it, the provider status accumulated while
//! the operation runs, and the VM API client for the Machine's infra cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use kube::ResourceExt;
use tracing::debug;

use kubevirt_actuator_client::{resolve_kubeconfig, CredentialsSource, VmClient, VmClientBuilder};
use kubevirt_actuator_common::crd::{
    KubevirtMachineProviderSpec, KubevirtMachineProviderStatus, Machine, MachineCondition,
    VirtualMachine,
};
use kubevirt_actuator_common::{
    provider_id, ActuatorConfig, Error, Result, INSTANCE_STATE_ANNOTATION, INSTANCE_TYPE_LABEL,
    PROVIDER_ID_ANNOTATION,
};

use crate::patch::{machine_patch_body, MachinePatcher};
use crate::render::render_virtual_machine;

const UNKNOWN_INSTANCE_STATE: &str = "Unknown";

/// Everything one reconcile call needs for one Machine
pub struct MachineScope {
    machine: Machine,
    name: String,
    namespace: String,
    provider_spec: KubevirtMachineProviderSpec,
    virtual_machine: VirtualMachine,
    original_status: KubevirtMachineProviderStatus,
    original_patch: serde_json::Value,
    provider_status: KubevirtMachineProviderStatus,
    client: Arc<dyn VmClient>,
    patcher: Arc<dyn MachinePatcher>,
    config: ActuatorConfig,
}

impl MachineScope {
    /// Build a scope for `machine`
    ///
    /// Decodes the provider spec, renders the VM, resolves the infra
    /// kubeconfig and builds a client for it. Configuration problems surface
    /// as [`Error::InvalidConfiguration`] tagged with the machine name.
    pub async fn new(
        machine: Machine,
        credentials: &dyn CredentialsSource,
        builder: &dyn VmClientBuilder,
        patcher: Arc<dyn MachinePatcher>,
        config: ActuatorConfig,
    ) -> Result<Self> {
        let provider_spec = machine.kubevirt_provider_spec()?;
        let virtual_machine = render_virtual_machine(&machine, &provider_spec)?;
        let name = machine.name_any();
        let namespace = machine.namespace().unwrap_or_default();

        let kubeconfig = resolve_kubeconfig(
            credentials,
            &provider_spec.credentials_secret_name,
            &namespace,
        )
        .await
        .map_err(|e| tag_machine(e, &name))?;
        let client = builder
            .build(&kubeconfig)
            .await
            .map_err(|e| tag_machine(e, &name))?;

        let provider_status = machine.kubevirt_provider_status()?;
        let original_patch = machine_patch_body(&machine);
        debug!(machine = %name, namespace = %namespace, "built machine scope");

        Ok(Self {
            machine,
            name,
            namespace,
            provider_spec,
            virtual_machine,
            original_status: provider_status.clone(),
            original_patch,
            provider_status,
            client,
            patcher,
            config,
        })
    }

    /// Machine name, also the VM name
    pub fn machine_name(&self) -> &str {
        &self.name
    }

    /// Machine namespace, also the VM namespace
    pub fn machine_namespace(&self) -> &str {
        &self.namespace
    }

    /// The Machine with every change made so far
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// VM rendered from the Machine
    pub fn virtual_machine(&self) -> &VirtualMachine {
        &self.virtual_machine
    }

    /// Provider status accumulated so far
    pub fn provider_status(&self) -> &KubevirtMachineProviderStatus {
        &self.provider_status
    }

    /// VM API client for the Machine's infra cluster
    pub fn client(&self) -> Arc<dyn VmClient> {
        Arc::clone(&self.client)
    }

    /// Timing configuration for this reconcile
    pub fn config(&self) -> &ActuatorConfig {
        &self.config
    }

    /// Point the Machine at `vm`
    pub fn set_provider_id(&mut self, vm: &VirtualMachine) {
        let namespace = vm.namespace().unwrap_or_else(|| self.namespace.clone());
        self.machine.spec.provider_id = Some(provider_id(&namespace, &vm.name_any()));
    }

    /// Copy VM-derived labels and annotations onto the Machine
    ///
    /// Fails when the remote object has no name or namespace.
    pub fn set_machine_cloud_provider_specifics(&mut self, vm: &VirtualMachine) -> Result<()> {
        let (vm_name, vm_namespace) = match (&vm.metadata.name, &vm.metadata.namespace) {
            (Some(name), Some(namespace)) => (name.clone(), namespace.clone()),
            _ => {
                return Err(Error::remote(
                    "read VirtualMachine",
                    format!("VM returned for machine {} has no name or namespace", self.name),
                ))
            }
        };

        let state = vm
            .printable_status()
            .unwrap_or(UNKNOWN_INSTANCE_STATE)
            .to_string();
        let annotations = self
            .machine
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new);
        annotations.insert(INSTANCE_STATE_ANNOTATION.to_string(), state);
        annotations.insert(
            PROVIDER_ID_ANNOTATION.to_string(),
            provider_id(&vm_namespace, &vm_name),
        );

        let instance_type = self.instance_type(vm);
        self.machine
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(INSTANCE_TYPE_LABEL.to_string(), instance_type);
        Ok(())
    }

    /// `<cores>cpu-<memory>`, read from the VM and falling back to the
    /// provider spec
    fn instance_type(&self, vm: &VirtualMachine) -> String {
        let domain = &vm.spec.template.spec.domain;
        let cores = domain
            .cpu
            .as_ref()
            .map(|c| c.cores)
            .filter(|cores| *cores > 0)
            .unwrap_or(self.provider_spec.requested_cpu);
        let memory = domain
            .memory
            .as_ref()
            .map(|m| m.guest.0.clone())
            .filter(|guest| !guest.is_empty())
            .unwrap_or_else(|| self.provider_spec.requested_memory.clone());
        format!("{}cpu-{}", cores, memory)
    }

    /// Record the outcome of the operation
    ///
    /// With a VM, refreshes the VM-derived fields; without one, clears them.
    /// The condition is overwritten either way.
    pub fn set_provider_status(
        &mut self,
        vm: Option<&VirtualMachine>,
        condition: MachineCondition,
    ) {
        match vm {
            Some(vm) => {
                self.provider_status.vm_id = vm.metadata.uid.clone();
                self.provider_status.vm_state = vm.printable_status().map(str::to_string);
                self.provider_status.ready = vm.is_ready();
            }
            None => self.provider_status.clear_vm_fields(),
        }
        self.provider_status
            .set_condition(condition.to_provider_condition(), Utc::now());
    }

    /// Whether a missing VM may still be eventual consistency
    ///
    /// True when the Machine already carries a provider ID and its status
    /// was either never timestamped or last changed inside the
    /// eventual-consistency window.
    pub fn update_allowed(&self) -> bool {
        if self.machine.spec.provider_id.is_none() {
            return false;
        }
        match self.machine.last_updated() {
            None => true,
            Some(last) => {
                let elapsed = Utc::now().signed_duration_since(last);
                elapsed.to_std().map_or(true, |e| e < self.config.eventual_consistency_window)
            }
        }
    }

    /// Write the accumulated state back onto the Machine
    ///
    /// `status.lastUpdated` moves only when the provider status changed.
    /// When neither the status nor any owned label, annotation or provider ID
    /// changed, nothing is written.
    pub async fn patch_machine(&mut self) -> Result<()> {
        let status_changed = self.provider_status != self.original_status;
        if !status_changed && machine_patch_body(&self.machine) == self.original_patch {
            debug!(machine = %self.name, "machine unchanged, skipping patch");
            return Ok(());
        }

        if status_changed {
            self.machine
                .status
                .get_or_insert_with(Default::default)
                .last_updated = Some(Utc::now());
        }
        self.machine
            .set_kubevirt_provider_status(&self.provider_status)?;
        self.patcher.patch_machine(&self.machine).await
    }
}

impl std::fmt::Debug for MachineScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineScope")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

fn tag_machine(err: Error, machine: &str) -> Error {
    match err {
        Error::InvalidConfiguration { message, .. } => {
            Error::invalid_configuration_for(machine, message)
        }
        other => other,
    }
}
