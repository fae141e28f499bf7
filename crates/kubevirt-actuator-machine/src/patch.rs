//! Writing a Machine back to the management cluster

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kubevirt_actuator_common::crd::Machine;
use kubevirt_actuator_common::error::classify_kube_error;
use kubevirt_actuator_common::kube_utils::patch_resource_status;
use kubevirt_actuator_common::{
    Error, Result, FIELD_MANAGER, INSTANCE_STATE_ANNOTATION, INSTANCE_TYPE_LABEL,
    PROVIDER_ID_ANNOTATION,
};

const MACHINE_KIND: &str = "Machine";

/// Persists the fields the actuator owns on a Machine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MachinePatcher: Send + Sync {
    /// Write labels, annotations, provider ID and status
    async fn patch_machine(&self, machine: &Machine) -> Result<()>;
}

/// Labels the actuator writes on a Machine
pub const OWNED_LABELS: &[&str] = &[INSTANCE_TYPE_LABEL];

/// Annotations the actuator writes on a Machine
pub const OWNED_ANNOTATIONS: &[&str] = &[INSTANCE_STATE_ANNOTATION, PROVIDER_ID_ANNOTATION];

/// Merge patch for the Machine object itself
///
/// Only the owned label and annotation keys are sent. Keys other
/// controllers manage are left out so a stale copy never resurrects them.
pub fn machine_patch_body(machine: &Machine) -> serde_json::Value {
    let mut metadata = serde_json::Map::new();
    if let Some(labels) = owned_entries(machine.metadata.labels.as_ref(), OWNED_LABELS) {
        metadata.insert("labels".to_string(), labels);
    }
    if let Some(annotations) =
        owned_entries(machine.metadata.annotations.as_ref(), OWNED_ANNOTATIONS)
    {
        metadata.insert("annotations".to_string(), annotations);
    }

    let mut body = serde_json::Map::new();
    if !metadata.is_empty() {
        body.insert("metadata".to_string(), serde_json::Value::Object(metadata));
    }
    if let Some(provider_id) = &machine.spec.provider_id {
        body.insert(
            "spec".to_string(),
            serde_json::json!({ "providerID": provider_id }),
        );
    }
    serde_json::Value::Object(body)
}

fn owned_entries(
    map: Option<&BTreeMap<String, String>>,
    keys: &[&str],
) -> Option<serde_json::Value> {
    let owned: serde_json::Map<String, serde_json::Value> = keys
        .iter()
        .filter_map(|key| {
            map.and_then(|m| m.get(*key))
                .map(|value| (key.to_string(), serde_json::json!(value)))
        })
        .collect();
    (!owned.is_empty()).then_some(serde_json::Value::Object(owned))
}

/// [`MachinePatcher`] over the management cluster API
pub struct KubeMachinePatcher {
    client: Client,
}

impl KubeMachinePatcher {
    /// Create a new KubeMachinePatcher wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MachinePatcher for KubeMachinePatcher {
    async fn patch_machine(&self, machine: &Machine) -> Result<()> {
        let name = machine.name_any();
        let namespace = machine
            .namespace()
            .ok_or_else(|| Error::invalid_configuration_for(&name, "machine has no namespace"))?;
        let api: Api<Machine> = Api::namespaced(self.client.clone(), &namespace);

        let body = machine_patch_body(machine);
        if body.as_object().is_some_and(|b| !b.is_empty()) {
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&body))
                .await
                .map_err(|e| classify_kube_error(e, "patch", MACHINE_KIND, &name, &namespace))?;
        }

        if let Some(status) = &machine.status {
            patch_resource_status::<Machine>(&self.client, &name, &namespace, status, FIELD_MANAGER)
                .await
                .map_err(|e| {
                    classify_kube_error(e, "patch status", MACHINE_KIND, &name, &namespace)
                })?;
        }

        debug!(machine = %name, namespace = %namespace, "patched machine");
        Ok(())
    }
}
