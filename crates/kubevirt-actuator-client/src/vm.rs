//! VM API client

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use kubevirt_actuator_common::crd::{VirtualMachine, VirtualMachineInstance};
use kubevirt_actuator_common::error::classify_kube_error;
use kubevirt_actuator_common::{service_name, Result, FIELD_MANAGER, SERVICE_SELECTOR_LABEL};

/// Kind used in errors about VirtualMachines
pub const VIRTUAL_MACHINE_KIND: &str = "VirtualMachine";
const VIRTUAL_MACHINE_INSTANCE_KIND: &str = "VirtualMachineInstance";
const SERVICE_KIND: &str = "Service";

/// Operations against the remote VM API
///
/// Implementations report missing objects as `Error::NotFound`, duplicate
/// creates as `Error::AlreadyExists` and stale version tokens as
/// `Error::Conflict`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VmClient: Send + Sync {
    /// Create a VM and return it as stored
    async fn create_virtual_machine(
        &self,
        namespace: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine>;

    /// Get a VM, `None` if it does not exist
    async fn get_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>>;

    /// Get the running instance of a VM, `None` if there is none
    async fn get_virtual_machine_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachineInstance>>;

    /// List VMs matching a label selector
    async fn list_virtual_machines(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<VirtualMachine>>;

    /// Replace a VM; its resourceVersion must match the stored one
    async fn update_virtual_machine(
        &self,
        namespace: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine>;

    /// Apply a JSON merge patch to a VM
    async fn patch_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<VirtualMachine>;

    /// Delete a VM
    async fn delete_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<()>;

    /// Set the VM running
    async fn start_virtual_machine(&self, namespace: &str, name: &str) -> Result<()>;

    /// Set the VM stopped
    async fn stop_virtual_machine(&self, namespace: &str, name: &str) -> Result<()>;

    /// Restart the VM by deleting its instance
    ///
    /// The VM controller recreates the instance while `running` is true.
    async fn restart_virtual_machine(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create the Service exposing a worker VM
    async fn create_service(&self, vm_name: &str, namespace: &str) -> Result<Service>;

    /// Delete the Service exposing a worker VM
    async fn delete_service(&self, vm_name: &str, namespace: &str) -> Result<()>;
}

/// Build the Service exposing a worker VM
///
/// Named `worker-<vm>` and selecting pods labelled `name=worker-<vm>`, which
/// is how rendered VMs label their instances.
pub fn worker_service(vm_name: &str, namespace: &str) -> Service {
    let name = service_name(vm_name);
    Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(SERVICE_SELECTOR_LABEL.to_string(), name)])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn running_patch(running: bool) -> serde_json::Value {
    serde_json::json!({ "spec": { "running": running } })
}

/// [`VmClient`] backed by a kube client for the infra cluster
pub struct KubevirtClient {
    client: Client,
}

impl KubevirtClient {
    /// Create a new KubevirtClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn vms(&self, namespace: &str) -> Api<VirtualMachine> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VmClient for KubevirtClient {
    async fn create_virtual_machine(
        &self,
        namespace: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine> {
        let name = vm.name_any();
        let created = self
            .vms(namespace)
            .create(&Self::post_params(), vm)
            .await
            .map_err(|e| classify_kube_error(e, "create", VIRTUAL_MACHINE_KIND, &name, namespace))?;
        info!(vm = %name, namespace = %namespace, "created VirtualMachine");
        Ok(created)
    }

    async fn get_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachine>> {
        self.vms(namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify_kube_error(e, "get", VIRTUAL_MACHINE_KIND, name, namespace))
    }

    async fn get_virtual_machine_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VirtualMachineInstance>> {
        let api: Api<VirtualMachineInstance> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(|e| {
            classify_kube_error(e, "get", VIRTUAL_MACHINE_INSTANCE_KIND, name, namespace)
        })
    }

    async fn list_virtual_machines(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<VirtualMachine>> {
        let list = self
            .vms(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| classify_kube_error(e, "list", VIRTUAL_MACHINE_KIND, "", namespace))?;
        Ok(list.items)
    }

    async fn update_virtual_machine(
        &self,
        namespace: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine> {
        let name = vm.name_any();
        let updated = self
            .vms(namespace)
            .replace(&name, &Self::post_params(), vm)
            .await
            .map_err(|e| classify_kube_error(e, "update", VIRTUAL_MACHINE_KIND, &name, namespace))?;
        debug!(
            vm = %name,
            namespace = %namespace,
            resource_version = ?updated.metadata.resource_version,
            "updated VirtualMachine"
        );
        Ok(updated)
    }

    async fn patch_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<VirtualMachine> {
        self.vms(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify_kube_error(e, "patch", VIRTUAL_MACHINE_KIND, name, namespace))
    }

    async fn delete_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: u32,
    ) -> Result<()> {
        let params = DeleteParams {
            grace_period_seconds: Some(grace_period_seconds),
            ..Default::default()
        };
        self.vms(namespace)
            .delete(name, &params)
            .await
            .map_err(|e| classify_kube_error(e, "delete", VIRTUAL_MACHINE_KIND, name, namespace))?;
        info!(vm = %name, namespace = %namespace, grace_period_seconds, "deleted VirtualMachine");
        Ok(())
    }

    async fn start_virtual_machine(&self, namespace: &str, name: &str) -> Result<()> {
        self.patch_virtual_machine(namespace, name, running_patch(true))
            .await?;
        Ok(())
    }

    async fn stop_virtual_machine(&self, namespace: &str, name: &str) -> Result<()> {
        self.patch_virtual_machine(namespace, name, running_patch(false))
            .await?;
        Ok(())
    }

    async fn restart_virtual_machine(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<VirtualMachineInstance> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| {
                classify_kube_error(e, "delete", VIRTUAL_MACHINE_INSTANCE_KIND, name, namespace)
            })?;
        info!(vm = %name, namespace = %namespace, "restarting VirtualMachine");
        Ok(())
    }

    async fn create_service(&self, vm_name: &str, namespace: &str) -> Result<Service> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = worker_service(vm_name, namespace);
        let name = service.name_any();
        api.create(&Self::post_params(), &service)
            .await
            .map_err(|e| classify_kube_error(e, "create", SERVICE_KIND, &name, namespace))
    }

    async fn delete_service(&self, vm_name: &str, namespace: &str) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let name = service_name(vm_name);
        api.delete(&name, &DeleteParams::default())
            .await
            .map_err(|e| classify_kube_error(e, "delete", SERVICE_KIND, &name, namespace))?;
        Ok(())
    }
}

impl std::fmt::Debug for KubevirtClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubevirtClient").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Config;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        path: String,
        body: String,
    }

    /// Loopback API server answering every request with one canned response
    struct MockApiServer {
        url: String,
        _handle: std::thread::JoinHandle<()>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl MockApiServer {
        fn start(status: u16, body: serde_json::Value) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));
            let body = body.to_string();

            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let mut reader = BufReader::new(stream.try_clone().unwrap());
                    let mut request_line = String::new();
                    if reader.read_line(&mut request_line).is_err() {
                        continue;
                    }
                    let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                    if parts.len() < 2 {
                        continue;
                    }

                    let mut content_length: usize = 0;
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                            break;
                        }
                        let lower = line.to_lowercase();
                        if let Some(val) = lower.strip_prefix("content-length: ") {
                            content_length = val.trim().parse().unwrap_or(0);
                        }
                    }
                    let mut request_body = vec![0u8; content_length];
                    if content_length > 0 {
                        let _ = reader.read_exact(&mut request_body);
                    }

                    requests_clone.lock().unwrap().push(CapturedRequest {
                        method: parts[0].to_owned(),
                        path: parts[1].to_owned(),
                        body: String::from_utf8_lossy(&request_body).into_owned(),
                    });

                    let response = format!(
                        "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes());
                    let _ = stream.flush();
                }
            });

            MockApiServer {
                url,
                _handle: handle,
                requests,
            }
        }

        fn client(&self) -> KubevirtClient {
            let _ = rustls::crypto::ring::default_provider().install_default();
            let config = Config::new(self.url.parse().unwrap());
            KubevirtClient::new(Client::try_from(config).unwrap())
        }

        fn only_request(&self) -> CapturedRequest {
            let requests = self.requests.lock().unwrap();
            assert_eq!(requests.len(), 1, "expected exactly one request: {requests:?}");
            requests[0].clone()
        }
    }

    const VM_PATH: &str = "/apis/kubevirt.io/v1/namespaces/tenant/virtualmachines";
    const VMI_PATH: &str = "/apis/kubevirt.io/v1/namespaces/tenant/virtualmachineinstances";

    fn vm_json(name: &str) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachine",
            "metadata": { "name": name, "namespace": "tenant", "resourceVersion": "7" },
            "spec": { "running": true }
        })
    }

    fn status_json(code: u16, reason: &str) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Status",
            "metadata": {},
            "status": if code < 300 { "Success" } else { "Failure" },
            "message": reason,
            "reason": reason,
            "code": code
        })
    }

    #[test]
    fn worker_service_selects_worker_label() {
        let service = worker_service("vm-a", "tenant");
        assert_eq!(service.metadata.name.as_deref(), Some("worker-vm-a"));
        assert_eq!(service.metadata.namespace.as_deref(), Some("tenant"));
        let selector = service.spec.unwrap().selector.unwrap();
        assert_eq!(selector.get("name").map(String::as_str), Some("worker-vm-a"));
        assert_eq!(selector.len(), 1);
    }

    #[test]
    fn running_patch_only_touches_running() {
        assert_eq!(
            running_patch(false),
            serde_json::json!({ "spec": { "running": false } })
        );
    }

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn start_sets_running_true() {
            let server = MockApiServer::start(200, vm_json("vm-a"));
            server
                .client()
                .start_virtual_machine("tenant", "vm-a")
                .await
                .unwrap();

            let request = server.only_request();
            assert_eq!(request.method, "PATCH");
            assert!(request.path.starts_with(&format!("{VM_PATH}/vm-a")));
            let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
            assert_eq!(body, running_patch(true));
        }

        #[tokio::test]
        async fn stop_sets_running_false() {
            let server = MockApiServer::start(200, vm_json("vm-a"));
            server
                .client()
                .stop_virtual_machine("tenant", "vm-a")
                .await
                .unwrap();

            let body: serde_json::Value =
                serde_json::from_str(&server.only_request().body).unwrap();
            assert_eq!(body, running_patch(false));
        }

        #[tokio::test]
        async fn restart_deletes_the_running_instance() {
            let server = MockApiServer::start(200, status_json(200, ""));
            server
                .client()
                .restart_virtual_machine("tenant", "vm-a")
                .await
                .unwrap();

            let request = server.only_request();
            assert_eq!(request.method, "DELETE");
            assert!(request.path.starts_with(&format!("{VMI_PATH}/vm-a")));
        }

        #[tokio::test]
        async fn delete_sends_grace_period() {
            let server = MockApiServer::start(200, status_json(200, ""));
            server
                .client()
                .delete_virtual_machine("tenant", "vm-a", 10)
                .await
                .unwrap();

            let request = server.only_request();
            assert_eq!(request.method, "DELETE");
            let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
            assert_eq!(body["gracePeriodSeconds"], 10);
        }
    }

    mod queries {
        use super::*;

        #[tokio::test]
        async fn list_filters_by_label_selector() {
            let server = MockApiServer::start(
                200,
                serde_json::json!({
                    "apiVersion": "kubevirt.io/v1",
                    "kind": "VirtualMachineList",
                    "metadata": { "resourceVersion": "7" },
                    "items": [vm_json("vm-a")]
                }),
            );
            let vms = server
                .client()
                .list_virtual_machines("tenant", "kubevirt.io/vm=vm-a")
                .await
                .unwrap();

            assert_eq!(vms.len(), 1);
            assert_eq!(vms[0].name_any(), "vm-a");
            let request = server.only_request();
            assert_eq!(request.method, "GET");
            assert!(request.path.starts_with(VM_PATH));
            assert!(request.path.contains("labelSelector=kubevirt.io%2Fvm%3Dvm-a"));
        }

        #[tokio::test]
        async fn missing_instance_is_none() {
            let server = MockApiServer::start(404, status_json(404, "NotFound"));
            let instance = server
                .client()
                .get_virtual_machine_instance("tenant", "vm-a")
                .await
                .unwrap();

            assert!(instance.is_none());
            assert!(server.only_request().path.starts_with(&format!("{VMI_PATH}/vm-a")));
        }

        #[tokio::test]
        async fn duplicate_create_is_already_exists() {
            let server = MockApiServer::start(409, status_json(409, "AlreadyExists"));
            let vm: VirtualMachine = serde_json::from_value(vm_json("vm-a")).unwrap();
            let err = server
                .client()
                .create_virtual_machine("tenant", &vm)
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                kubevirt_actuator_common::Error::AlreadyExists { ref name, .. } if name == "vm-a"
            ));
        }
    }
}
