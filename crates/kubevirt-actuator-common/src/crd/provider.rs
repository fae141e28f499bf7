//! KubeVirt provider spec and provider status carried inside a Machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_requested_storage() -> String {
    "35Gi".to_string()
}

fn default_pvc_access_mode() -> String {
    "ReadWriteOnce".to_string()
}

fn default_requested_cpu() -> u32 {
    4
}

fn default_requested_memory() -> String {
    "2048M".to_string()
}

/// Provider configuration for a KubeVirt-backed machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtMachineProviderSpec {
    /// Golden image PVC cloned into the VM boot volume
    #[serde(default)]
    pub source_pvc_name: String,

    /// Namespace of the golden image PVC (defaults to the machine namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pvc_namespace: Option<String>,

    /// Storage class for the boot volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Size of the boot volume
    #[serde(default = "default_requested_storage")]
    pub requested_storage: String,

    /// Access mode of the boot volume
    #[serde(default = "default_pvc_access_mode")]
    pub pvc_access_mode: String,

    /// CPU cores
    #[serde(default = "default_requested_cpu")]
    pub requested_cpu: u32,

    /// Guest memory
    #[serde(default = "default_requested_memory")]
    pub requested_memory: String,

    /// Multus network attachment; the pod network is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,

    /// Secret holding the ignition/cloud-init user data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignition_secret_name: Option<String>,

    /// Secret in the machine namespace holding the infra cluster kubeconfig
    #[serde(default)]
    pub credentials_secret_name: String,
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

/// Condition types reported in the provider status
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ProviderConditionType {
    /// Outcome of the last create/update against the VM API
    MachineCreation,
}

/// Reason reported when the last operation succeeded
pub const MACHINE_CREATION_SUCCEEDED: &str = "MachineCreationSucceeded";

/// Reason reported when the last operation failed
pub const MACHINE_CREATION_FAILED: &str = "MachineCreationFailed";

/// A single provider condition
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtMachineProviderCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: ProviderConditionType,

    /// Condition status
    pub status: ConditionStatus,

    /// Machine-readable reason
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<DateTime<Utc>>,

    /// Last time the condition status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl KubevirtMachineProviderCondition {
    /// Same type, status, reason and message, ignoring timestamps
    pub fn same_state(&self, other: &Self) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Coarse outcome of the last operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MachineCondition {
    /// The VM API call succeeded
    Success,
    /// The VM API call failed with the given message
    Failed(String),
}

impl MachineCondition {
    /// Render as a `MachineCreation` provider condition without timestamps
    pub fn to_provider_condition(&self) -> KubevirtMachineProviderCondition {
        let (status, reason, message) = match self {
            MachineCondition::Success => (
                ConditionStatus::True,
                MACHINE_CREATION_SUCCEEDED,
                "Machine successfully created".to_string(),
            ),
            MachineCondition::Failed(message) => {
                (ConditionStatus::False, MACHINE_CREATION_FAILED, message.clone())
            }
        };
        KubevirtMachineProviderCondition {
            type_: ProviderConditionType::MachineCreation,
            status,
            reason: reason.to_string(),
            message,
            last_probe_time: None,
            last_transition_time: None,
        }
    }
}

/// Provider status written back onto the Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtMachineProviderStatus {
    /// UID of the backing VM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,

    /// Printable status of the backing VM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_state: Option<String>,

    /// Whether the backing VM reported ready
    #[serde(default)]
    pub ready: bool,

    /// Conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<KubevirtMachineProviderCondition>,
}

impl KubevirtMachineProviderStatus {
    /// Overwrite the condition of the same type
    ///
    /// A condition identical in status, reason and message to the stored one
    /// leaves it untouched, timestamps included. Otherwise the probe time
    /// moves to `now` and the transition time only moves when the status
    /// flips.
    pub fn set_condition(
        &mut self,
        mut condition: KubevirtMachineProviderCondition,
        now: DateTime<Utc>,
    ) {
        condition.last_probe_time = Some(now);
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) if existing.same_state(&condition) => {}
            Some(existing) => {
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time.or(Some(now))
                } else {
                    Some(now)
                };
                *existing = condition;
            }
            None => {
                condition.last_transition_time = Some(now);
                self.conditions.push(condition);
            }
        }
    }

    /// The current `MachineCreation` condition, if any
    pub fn machine_creation_condition(&self) -> Option<&KubevirtMachineProviderCondition> {
        self.conditions
            .iter()
            .find(|c| c.type_ == ProviderConditionType::MachineCreation)
    }

    /// Drop every field derived from an observed VM
    pub fn clear_vm_fields(&mut self) {
        self.vm_id = None;
        self.vm_state = None;
        self.ready = false;
    }
}
