//! Actuator timing configuration
//!
//! Requeue delays, the VM delete grace period and the eventual-consistency
//! window, all overridable from the operator CLI.

use std::time::Duration;

/// Delay before re-running an operation that is likely to succeed soon
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(20);

/// Delay before re-running an operation that is likely stuck
pub const DEFAULT_REQUEUE_AFTER_FATAL: Duration = Duration::from_secs(180);

/// Grace period passed to the remote API when deleting a VM
pub const DEFAULT_DELETE_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Periodic resync for machines whose VM is settled
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Timing knobs shared by the reconciler and the controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActuatorConfig {
    /// Short requeue: VM not ready yet, or an eventual-consistency window
    pub requeue_after: Duration,
    /// Long requeue: VM unexpectedly gone, avoid hot-looping
    pub requeue_after_fatal: Duration,
    /// Grace period for VM deletion
    pub delete_grace_period: Duration,
    /// How long after the last status write a missing VM is still
    /// attributed to eventual consistency rather than loss
    pub eventual_consistency_window: Duration,
    /// Requeue interval after a fully successful reconcile
    pub resync_interval: Duration,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            requeue_after: DEFAULT_REQUEUE_AFTER,
            requeue_after_fatal: DEFAULT_REQUEUE_AFTER_FATAL,
            delete_grace_period: DEFAULT_DELETE_GRACE_PERIOD,
            eventual_consistency_window: DEFAULT_REQUEUE_AFTER,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
        }
    }
}

impl ActuatorConfig {
    /// Grace period in whole seconds, as the delete API expects
    pub fn delete_grace_period_seconds(&self) -> u32 {
        u32::try_from(self.delete_grace_period.as_secs()).unwrap_or(u32::MAX)
    }
}
