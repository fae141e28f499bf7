//! Create, update, delete and exists for KubeVirt-backed Machines
//!
//! Every mutating operation runs inside [`Reconciler::with_scope`], which
//! hands the scope back for patching once however the operation ends.
//! Requeue requests travel in the `Ok` channel as [`Outcome`]; errors are
//! reserved for failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use kubevirt_actuator_client::{CredentialsSource, VmClientBuilder};
use kubevirt_actuator_common::crd::{Machine, MachineCondition, VirtualMachine};
use kubevirt_actuator_common::{ActuatorConfig, Error, Result};

use crate::patch::MachinePatcher;
use crate::scope::MachineScope;

/// What the caller should do after an operation succeeds
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do
    Done,
    /// Transient state; run the same operation again after the delay
    RequeueSoon(Duration),
    /// Likely stuck; run the same operation again after the (long) delay
    BackOff(Duration),
}

/// Machine lifecycle operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MachineActuator: Send + Sync {
    /// Create the VM backing `machine`
    async fn create(&self, machine: &Machine) -> Result<Outcome>;
    /// Bring the VM backing `machine` in line with its spec
    async fn update(&self, machine: &Machine) -> Result<Outcome>;
    /// Delete the VM backing `machine`
    async fn delete(&self, machine: &Machine) -> Result<Outcome>;
    /// Whether the VM backing `machine` exists
    async fn exists(&self, machine: &Machine) -> Result<bool>;
}

/// [`MachineActuator`] for KubeVirt VMs on an infra cluster
pub struct Reconciler {
    credentials: Arc<dyn CredentialsSource>,
    builder: Arc<dyn VmClientBuilder>,
    patcher: Arc<dyn MachinePatcher>,
    config: ActuatorConfig,
}

impl Reconciler {
    /// Create a reconciler from its collaborators
    pub fn new(
        credentials: Arc<dyn CredentialsSource>,
        builder: Arc<dyn VmClientBuilder>,
        patcher: Arc<dyn MachinePatcher>,
        config: ActuatorConfig,
    ) -> Self {
        Self {
            credentials,
            builder,
            patcher,
            config,
        }
    }

    async fn scope(&self, machine: &Machine) -> Result<MachineScope> {
        MachineScope::new(
            machine.clone(),
            self.credentials.as_ref(),
            self.builder.as_ref(),
            Arc::clone(&self.patcher),
            self.config.clone(),
        )
        .await
    }

    /// Run `op` against a fresh scope, then patch the Machine
    ///
    /// A scope that cannot be built fails the call without a patch. Once
    /// built, the patch always runs. The operation's error wins over a patch
    /// error; a patch error only surfaces when the operation succeeded.
    async fn with_scope<F>(&self, machine: &Machine, action: &'static str, op: F) -> Result<Outcome>
    where
        F: for<'s> FnOnce(&'s mut MachineScope) -> BoxFuture<'s, Result<Outcome>> + Send,
    {
        let mut scope = self.scope(machine).await?;
        let result = op(&mut scope).await;
        let patched = scope.patch_machine().await;

        match (result, patched) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(patch_err)) => Err(patch_err.context(format!(
                "failed to patch machine {} after {}",
                scope.machine_name(),
                action
            ))),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(patch_err)) => {
                warn!(
                    machine = %scope.machine_name(),
                    action,
                    error = %patch_err,
                    "failed to patch machine after failed operation"
                );
                Err(err)
            }
        }
    }
}

#[async_trait]
impl MachineActuator for Reconciler {
    #[instrument(
        skip(self, machine),
        fields(machine = %machine.name_any(), namespace = ?machine.namespace())
    )]
    async fn create(&self, machine: &Machine) -> Result<Outcome> {
        self.with_scope(machine, "create", |scope| Box::pin(create_vm(scope)))
            .await
    }

    #[instrument(
        skip(self, machine),
        fields(machine = %machine.name_any(), namespace = ?machine.namespace())
    )]
    async fn update(&self, machine: &Machine) -> Result<Outcome> {
        self.with_scope(machine, "update", |scope| Box::pin(update_vm(scope)))
            .await
    }

    #[instrument(
        skip(self, machine),
        fields(machine = %machine.name_any(), namespace = ?machine.namespace())
    )]
    async fn delete(&self, machine: &Machine) -> Result<Outcome> {
        self.with_scope(machine, "delete", |scope| Box::pin(delete_vm(scope)))
            .await
    }

    #[instrument(
        skip(self, machine),
        fields(machine = %machine.name_any(), namespace = ?machine.namespace())
    )]
    async fn exists(&self, machine: &Machine) -> Result<bool> {
        let scope = self.scope(machine).await?;
        let found = scope
            .client()
            .get_virtual_machine(scope.machine_namespace(), scope.machine_name())
            .await;

        match found {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

async fn create_vm(scope: &mut MachineScope) -> Result<Outcome> {
    let client = scope.client();
    let desired = scope.virtual_machine().clone();

    let vm = match client
        .create_virtual_machine(scope.machine_namespace(), &desired)
        .await
    {
        Ok(vm) => vm,
        Err(e) => {
            scope.set_provider_status(None, MachineCondition::Failed(e.to_string()));
            return Err(e.context("failed to create virtual machine"));
        }
    };
    info!(machine = %scope.machine_name(), uid = ?vm.metadata.uid, "created VM");

    record_success(scope, &vm)?;
    ensure_worker_service(scope, &vm).await;
    Ok(readiness(scope, &vm))
}

async fn update_vm(scope: &mut MachineScope) -> Result<Outcome> {
    let client = scope.client();
    let namespace = scope.machine_namespace().to_string();
    let name = scope.machine_name().to_string();

    let existing = match client.get_virtual_machine(&namespace, &name).await? {
        Some(vm) => vm,
        None if scope.update_allowed() => {
            debug!(machine = %name, "VM not visible yet, waiting out eventual consistency");
            return Ok(Outcome::RequeueSoon(scope.config().requeue_after));
        }
        None => {
            warn!(machine = %name, "VM is gone, backing off");
            scope.set_provider_status(None, MachineCondition::Success);
            return Ok(Outcome::BackOff(scope.config().requeue_after_fatal));
        }
    };

    let mut desired = scope.virtual_machine().clone();
    desired.metadata.resource_version = existing.metadata.resource_version.clone();

    let updated = client
        .update_virtual_machine(&namespace, &desired)
        .await
        .map_err(|e| e.context("failed to update VM"))?;
    record_success(scope, &updated)?;
    ensure_worker_service(scope, &updated).await;

    let observed = match client.get_virtual_machine(&namespace, &name).await {
        Ok(Some(vm)) => vm,
        Ok(None) => updated,
        Err(e) => {
            debug!(machine = %name, error = %e, "re-fetch after update failed");
            updated
        }
    };
    Ok(readiness(scope, &observed))
}

async fn delete_vm(scope: &mut MachineScope) -> Result<Outcome> {
    let client = scope.client();
    let namespace = scope.machine_namespace().to_string();
    let name = scope.machine_name().to_string();

    let vm = match client.get_virtual_machine(&namespace, &name).await {
        Ok(Some(vm)) => vm,
        Ok(None) => {
            info!(machine = %name, "VM already absent");
            return Ok(Outcome::Done);
        }
        Err(e) if e.is_not_found() => {
            info!(machine = %name, "VM already absent");
            return Ok(Outcome::Done);
        }
        Err(e) => return Err(e),
    };

    let vm_name = vm.name_any();
    client
        .delete_virtual_machine(
            &namespace,
            &vm_name,
            scope.config().delete_grace_period_seconds(),
        )
        .await
        .map_err(|e| e.context("failed to delete VM"))?;
    info!(machine = %name, vm = %vm_name, "deleted VM");

    match client.delete_service(&vm_name, &namespace).await {
        Ok(()) => debug!(vm = %vm_name, "deleted worker service"),
        Err(e) if e.is_not_found() => {}
        Err(e) => warn!(vm = %vm_name, error = %e, "failed to delete worker service"),
    }
    Ok(Outcome::Done)
}

/// Provider ID, labels/annotations and a Success condition from `vm`
fn record_success(scope: &mut MachineScope, vm: &VirtualMachine) -> Result<()> {
    scope.set_provider_id(vm);
    scope
        .set_machine_cloud_provider_specifics(vm)
        .map_err(|e| e.context("failed to set machine cloud provider specifics"))?;
    scope.set_provider_status(Some(vm), MachineCondition::Success);
    Ok(())
}

/// Create the Service exposing the VM unless it already exists
///
/// Failures are logged and retried on the next update; they never fail the
/// operation.
async fn ensure_worker_service(scope: &MachineScope, vm: &VirtualMachine) {
    let vm_name = vm.name_any();
    match scope
        .client()
        .create_service(&vm_name, scope.machine_namespace())
        .await
    {
        Ok(service) => {
            debug!(vm = %vm_name, service = %service.name_any(), "created worker service")
        }
        Err(e) if matches!(e.root(), Error::AlreadyExists { .. }) => {}
        Err(e) => warn!(vm = %vm_name, error = %e, "failed to create worker service"),
    }
}

/// Requeue until the VM reports ready
fn readiness(scope: &MachineScope, vm: &VirtualMachine) -> Outcome {
    if vm.is_ready() {
        Outcome::Done
    } else {
        debug!(machine = %scope.machine_name(), "VM not ready yet");
        Outcome::RequeueSoon(scope.config().requeue_after)
    }
}
