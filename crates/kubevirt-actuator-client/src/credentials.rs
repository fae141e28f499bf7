//! Infra cluster credential resolution

use async_trait::async_trait;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kubevirt_actuator_common::kube_utils::get_secret_data;
use kubevirt_actuator_common::{Error, Result, KUBECONFIG_SECRET_KEY};

/// Source of infra cluster kubeconfigs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialsSource: Send + Sync {
    /// Raw kubeconfig stored in the named secret
    async fn kubeconfig(&self, secret_name: &str, namespace: &str) -> Result<Vec<u8>>;
}

/// Validate the secret reference, then fetch the kubeconfig
///
/// An empty secret name or namespace can never resolve, so it fails with
/// [`Error::InvalidConfiguration`] before any remote call.
pub async fn resolve_kubeconfig(
    source: &dyn CredentialsSource,
    secret_name: &str,
    namespace: &str,
) -> Result<Vec<u8>> {
    if secret_name.is_empty() {
        return Err(Error::invalid_configuration(
            "credentials secret name is empty",
        ));
    }
    if namespace.is_empty() {
        return Err(Error::invalid_configuration(format!(
            "namespace for credentials secret {} is empty",
            secret_name
        )));
    }
    let kubeconfig = source.kubeconfig(secret_name, namespace).await?;
    if kubeconfig.is_empty() {
        return Err(Error::invalid_configuration(format!(
            "secret {}/{} has an empty {}",
            namespace, secret_name, KUBECONFIG_SECRET_KEY
        )));
    }
    Ok(kubeconfig)
}

/// Reads kubeconfigs from secrets in the management cluster
pub struct SecretCredentials {
    client: Client,
}

impl SecretCredentials {
    /// Create a new SecretCredentials reading through the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialsSource for SecretCredentials {
    async fn kubeconfig(&self, secret_name: &str, namespace: &str) -> Result<Vec<u8>> {
        debug!(secret = %secret_name, namespace = %namespace, "reading infra kubeconfig");
        get_secret_data(&self.client, secret_name, namespace, KUBECONFIG_SECRET_KEY).await
    }
}
