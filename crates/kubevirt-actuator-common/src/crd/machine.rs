//! Machine resource (machine.openshift.io/v1beta1)
//!
//! The machine-api owns this CRD; the actuator only reads the spec and
//! writes the provider ID, labels, annotations and status. Schema generation
//! is disabled because the CRD is never installed from here.

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

use super::provider::{KubevirtMachineProviderSpec, KubevirtMachineProviderStatus};
use crate::{Error, Result};

/// Desired state of a Machine
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    schema = "disabled",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Identifier of the backing VM, `kubevirt://<namespace>/<name>`
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Provider-specific configuration
    #[serde(default)]
    pub provider_spec: ProviderSpec,
}

/// Opaque provider configuration carried by the Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProviderSpec {
    /// Raw provider spec, decoded as [`KubevirtMachineProviderSpec`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Observed state of a Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Raw provider status, encoded from [`KubevirtMachineProviderStatus`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<serde_json::Value>,

    /// Last time the actuator changed the provider status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Machine {
    /// Decode the provider spec
    ///
    /// A missing or malformed provider spec is a configuration error: no
    /// amount of retrying will fix it.
    pub fn kubevirt_provider_spec(&self) -> Result<KubevirtMachineProviderSpec> {
        let value = self.spec.provider_spec.value.clone().ok_or_else(|| {
            Error::invalid_configuration_for(self.name_any(), "providerSpec.value is empty")
        })?;
        serde_json::from_value(value).map_err(|e| {
            Error::invalid_configuration_for(
                self.name_any(),
                format!("failed to decode providerSpec: {}", e),
            )
        })
    }

    /// Decode the provider status, defaulting when none has been written yet
    pub fn kubevirt_provider_status(&self) -> Result<KubevirtMachineProviderStatus> {
        match self
            .status
            .as_ref()
            .and_then(|s| s.provider_status.clone())
        {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| Error::serialization(format!("providerStatus: {}", e))),
            None => Ok(KubevirtMachineProviderStatus::default()),
        }
    }

    /// Encode and store the provider status
    pub fn set_kubevirt_provider_status(
        &mut self,
        status: &KubevirtMachineProviderStatus,
    ) -> Result<()> {
        let value = serde_json::to_value(status)
            .map_err(|e| Error::serialization(format!("providerStatus: {}", e)))?;
        self.status
            .get_or_insert_with(MachineStatus::default)
            .provider_status = Some(value);
        Ok(())
    }

    /// Last time the actuator changed this machine's status
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.last_updated)
    }
}
