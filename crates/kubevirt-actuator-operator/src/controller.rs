//! Machine controller
//!
//! Watches Machines and drives the actuator: a live Machine is updated when
//! its VM exists and created otherwise; a deleted Machine has its VM removed
//! before the finalizer is released.

use std::sync::Arc;
use std::time::Duration;

use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Error as FinalizerError, Event};
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use kubevirt_actuator_client::{KubeconfigClientBuilder, SecretCredentials};
use kubevirt_actuator_common::crd::Machine;
use kubevirt_actuator_common::ActuatorConfig;
use kubevirt_actuator_machine::{KubeMachinePatcher, MachineActuator, Outcome, Reconciler};

/// Finalizer keeping a Machine around until its VM is gone
pub const FINALIZER: &str = "machine.kubevirt.io/actuator";

/// Errors surfaced to the controller runtime
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The actuator failed
    #[error(transparent)]
    Actuator(#[from] kubevirt_actuator_common::Error),

    /// VM teardown has not finished; the finalizer must stay
    #[error("VM deletion still in progress, retrying in {0:?}")]
    DeletionPending(Duration),
}

/// Shared controller state
pub struct Context {
    /// Management cluster client
    pub client: Client,
    /// Machine lifecycle operations
    pub actuator: Arc<dyn MachineActuator>,
    /// Requeue timing
    pub config: ActuatorConfig,
}

impl Context {
    /// Wire the KubeVirt reconciler against the management cluster
    pub fn new(client: Client, builder: KubeconfigClientBuilder, config: ActuatorConfig) -> Self {
        let reconciler = Reconciler::new(
            Arc::new(SecretCredentials::new(client.clone())),
            Arc::new(builder),
            Arc::new(KubeMachinePatcher::new(client.clone())),
            config.clone(),
        );
        Self {
            client,
            actuator: Arc::new(reconciler),
            config,
        }
    }
}

/// Reconcile one Machine
#[instrument(skip(machine, ctx), fields(machine = %machine.name_any()))]
pub async fn reconcile(
    machine: Arc<Machine>,
    ctx: Arc<Context>,
) -> Result<Action, FinalizerError<ReconcileError>> {
    let namespace = machine.namespace().unwrap_or_default();
    let api: Api<Machine> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, FINALIZER, machine, |event| async {
        match event {
            Event::Apply(machine) => {
                apply(&machine, ctx.actuator.as_ref(), &ctx.config).await
            }
            Event::Cleanup(machine) => {
                cleanup(&machine, ctx.actuator.as_ref()).await
            }
        }
    })
    .await
}

/// Create or update the VM behind a live Machine
pub async fn apply(
    machine: &Machine,
    actuator: &dyn MachineActuator,
    config: &ActuatorConfig,
) -> Result<Action, ReconcileError> {
    let outcome = if actuator.exists(machine).await? {
        debug!("VM exists, updating");
        actuator.update(machine).await?
    } else {
        info!("VM missing, creating");
        actuator.create(machine).await?
    };
    Ok(action_for(&outcome, config))
}

/// Remove the VM behind a deleted Machine
///
/// Only a finished delete releases the finalizer.
pub async fn cleanup(
    machine: &Machine,
    actuator: &dyn MachineActuator,
) -> Result<Action, ReconcileError> {
    match actuator.delete(machine).await? {
        Outcome::Done => {
            info!("VM removed, releasing finalizer");
            Ok(Action::await_change())
        }
        Outcome::RequeueSoon(delay) | Outcome::BackOff(delay) => {
            Err(ReconcileError::DeletionPending(delay))
        }
    }
}

/// Requeue action for a successful operation
pub fn action_for(outcome: &Outcome, config: &ActuatorConfig) -> Action {
    match outcome {
        Outcome::Done => Action::requeue(config.resync_interval),
        Outcome::RequeueSoon(delay) | Outcome::BackOff(delay) => Action::requeue(*delay),
    }
}

/// Requeue delay for a failed reconcile
///
/// Configuration errors will not fix themselves, so they wait the long
/// delay; everything else retries after the short one.
pub fn retry_delay(error: &FinalizerError<ReconcileError>, config: &ActuatorConfig) -> Duration {
    match error {
        FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => match e {
            ReconcileError::DeletionPending(delay) => *delay,
            ReconcileError::Actuator(e) if !e.is_retryable() => config.requeue_after_fatal,
            ReconcileError::Actuator(_) => config.requeue_after,
        },
        _ => config.requeue_after,
    }
}

/// Error policy for the Machine controller
pub fn error_policy(
    machine: Arc<Machine>,
    error: &FinalizerError<ReconcileError>,
    ctx: Arc<Context>,
) -> Action {
    let delay = retry_delay(error, &ctx.config);
    match error {
        FinalizerError::CleanupFailed(ReconcileError::DeletionPending(_)) => {
            debug!(machine = %machine.name_any(), ?delay, "VM deletion pending");
        }
        FinalizerError::ApplyFailed(ReconcileError::Actuator(e))
        | FinalizerError::CleanupFailed(ReconcileError::Actuator(e))
            if !e.is_retryable() =>
        {
            warn!(machine = %machine.name_any(), error = %e, ?delay, "machine misconfigured");
        }
        _ => error!(machine = %machine.name_any(), error = %error, ?delay, "reconcile failed"),
    }
    Action::requeue(delay)
}
