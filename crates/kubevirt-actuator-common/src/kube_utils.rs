//! Kubernetes helpers shared by the client and machine crates

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

use crate::{Error, Result};

/// Read one key of a secret
///
/// A missing secret or key is reported as [`Error::InvalidConfiguration`];
/// any other API failure keeps its kube error.
pub async fn get_secret_data(
    client: &Client,
    name: &str,
    namespace: &str,
    key: &str,
) -> Result<Vec<u8>> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let secret = match secrets.get(name).await {
        Ok(secret) => secret,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            return Err(Error::invalid_configuration(format!(
                "secret {}/{} not found",
                namespace, name
            )));
        }
        Err(e) => return Err(e.into()),
    };

    secret_key(&secret, key).ok_or_else(|| {
        Error::invalid_configuration(format!(
            "secret {}/{} missing key {}",
            namespace, name, key
        ))
    })
}

/// Extract a key from a secret, checking `data` before `stringData`
pub fn secret_key(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    if let Some(value) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return Some(value.0.clone());
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.as_bytes().to_vec())
}

/// Merge-patch the status sub-resource of a namespaced resource
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> std::result::Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    debug!(name = %name, namespace = %namespace, "patching status");
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret_with(data: Option<(&str, &str)>, string_data: Option<(&str, &str)>) -> Secret {
        Secret {
            data: data.map(|(k, v)| {
                BTreeMap::from([(k.to_string(), ByteString(v.as_bytes().to_vec()))])
            }),
            string_data: string_data
                .map(|(k, v)| BTreeMap::from([(k.to_string(), v.to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn secret_key_reads_data() {
        let secret = secret_with(Some(("kubeconfig", "apiVersion: v1")), None);
        assert_eq!(
            secret_key(&secret, "kubeconfig"),
            Some(b"apiVersion: v1".to_vec())
        );
    }

    #[test]
    fn secret_key_falls_back_to_string_data() {
        let secret = secret_with(None, Some(("kubeconfig", "apiVersion: v1")));
        assert_eq!(
            secret_key(&secret, "kubeconfig"),
            Some(b"apiVersion: v1".to_vec())
        );
    }

    #[test]
    fn secret_key_missing_is_none() {
        let secret = secret_with(Some(("token", "abc")), None);
        assert!(secret_key(&secret, "kubeconfig").is_none());
    }
}
