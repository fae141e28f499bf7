//! Build VM API clients from kubeconfigs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kubevirt_actuator_common::{Error, Result};

use crate::vm::{KubevirtClient, VmClient};

/// Connect timeout for infra cluster clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for infra cluster clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Turns a kubeconfig into a ready VM API client
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VmClientBuilder: Send + Sync {
    /// Build a client for the cluster the kubeconfig points at
    async fn build(&self, kubeconfig: &[u8]) -> Result<Arc<dyn VmClient>>;
}

/// Builds [`KubevirtClient`]s over kube-rs
///
/// A fresh client is built per call; nothing is cached between machines.
#[derive(Clone, Debug)]
pub struct KubeconfigClientBuilder {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for KubeconfigClientBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl KubeconfigClientBuilder {
    /// Builder with custom timeouts
    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    async fn config(&self, kubeconfig: &[u8]) -> Result<Config> {
        let kubeconfig: Kubeconfig = serde_yaml::from_slice(kubeconfig).map_err(|e| {
            Error::invalid_configuration(format!("failed to parse kubeconfig: {}", e))
        })?;
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                Error::invalid_configuration(format!("failed to load kubeconfig: {}", e))
            })?;
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);
        Ok(config)
    }
}

#[async_trait]
impl VmClientBuilder for KubeconfigClientBuilder {
    async fn build(&self, kubeconfig: &[u8]) -> Result<Arc<dyn VmClient>> {
        let config = self.config(kubeconfig).await?;
        debug!(cluster_url = %config.cluster_url, "building infra cluster client");
        let client = Client::try_from(config)?;
        Ok(Arc::new(KubevirtClient::new(client)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: infra
clusters:
- name: infra
  cluster:
    server: https://infra.example.com:6443
contexts:
- name: infra
  context:
    cluster: infra
    user: admin
users:
- name: admin
  user:
    token: abc123
"#;

    #[tokio::test]
    async fn non_kubeconfig_bytes_are_invalid_configuration() {
        let builder = KubeconfigClientBuilder::default();
        let err = builder.config(b"not a kubeconfig").await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration { .. }));
        assert!(err.to_string().contains("failed to parse kubeconfig"));
    }

    #[tokio::test]
    async fn kubeconfig_without_context_is_invalid_configuration() {
        let builder = KubeconfigClientBuilder::default();
        let err = builder
            .config(b"apiVersion: v1\nkind: Config\n")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration { .. }));
    }

    #[tokio::test]
    async fn applies_timeouts_and_server() {
        let builder =
            KubeconfigClientBuilder::with_timeouts(Duration::from_secs(1), Duration::from_secs(2));
        let config = builder.config(KUBECONFIG.as_bytes()).await.unwrap();
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.cluster_url.host(), Some("infra.example.com"));
    }
}
