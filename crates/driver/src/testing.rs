//! Shared fixtures for module tests: canned claim/pod objects and an
//! in-memory claim store.

use async_trait::async_trait;
use dashmap::DashMap;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::resource::v1beta1::AllocationResult;
use k8s_openapi::api::resource::v1beta1::DeviceAllocationConfiguration;
use k8s_openapi::api::resource::v1beta1::DeviceAllocationResult;
use k8s_openapi::api::resource::v1beta1::DeviceRequestAllocationResult;
use k8s_openapi::api::resource::v1beta1::OpaqueDeviceConfiguration;
use k8s_openapi::api::resource::v1beta1::ResourceClaim;
use k8s_openapi::api::resource::v1beta1::ResourceClaimConsumerReference;
use k8s_openapi::api::resource::v1beta1::ResourceClaimStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use serde_json::json;
use serde_json::Value;

use std::sync::Mutex;

use anyhow::bail;
use anyhow::Result;

use crate::cni::ChainInvocation;
use crate::cni::ChainRunner;
use crate::cni::NetworkConfigList;
use crate::k8s::ClaimStore;
use crate::k8s::KubernetesError;

pub const TEST_NAMESPACE: &str = "default";

/// Bare claim with identity only.
pub fn claim_named(name: &str, uid: &str) -> ResourceClaim {
    ResourceClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Claim allocated to `driver` with a single device result (`p0`/`eth0`),
/// a single opaque config carrying `parameters`, and one pod consumer.
pub fn allocated_claim(
    name: &str,
    uid: &str,
    driver: &str,
    pod_uid: &str,
    parameters: Value,
) -> ResourceClaim {
    let mut claim = claim_named(name, uid);
    claim.status = Some(ResourceClaimStatus {
        allocation: Some(AllocationResult {
            devices: Some(DeviceAllocationResult {
                results: Some(vec![DeviceRequestAllocationResult {
                    driver: driver.to_string(),
                    pool: "p0".to_string(),
                    device: "eth0".to_string(),
                    request: "net".to_string(),
                    ..Default::default()
                }]),
                config: Some(vec![DeviceAllocationConfiguration {
                    source: "FromClaim".to_string(),
                    opaque: Some(OpaqueDeviceConfiguration {
                        driver: driver.to_string(),
                        parameters: RawExtension(parameters),
                    }),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        }),
        reserved_for: Some(vec![pod_consumer(pod_uid)]),
        ..Default::default()
    });
    claim
}

pub fn pod_consumer(uid: &str) -> ResourceClaimConsumerReference {
    ResourceClaimConsumerReference {
        resource: "pods".to_string(),
        name: "consumer".to_string(),
        uid: uid.to_string(),
        ..Default::default()
    }
}

/// Opaque parameter blob in the shape the attachment engine decodes: an
/// embedded CNI conflist plus a target interface name.
pub fn attachment_parameters(interface: &str) -> Value {
    json!({
        "config": {
            "cniVersion": "1.0.0",
            "name": "test-net",
            "plugins": [
                { "type": "macvlan", "master": "eth0" }
            ]
        },
        "interface": interface,
    })
}

/// A CNI 1.0.0 add result with one sandbox interface.
pub fn cni_result(address: &str, ifname: &str, mac: &str) -> Value {
    json!({
        "cniVersion": "1.0.0",
        "interfaces": [
            { "name": ifname, "mac": mac, "sandbox": "/proc/123/ns/net" }
        ],
        "ips": [
            { "address": address, "interface": 0 }
        ]
    })
}

/// `ChainRunner` that records invocations and returns a canned result.
/// Invocations whose interface matches `fail_on_interface` fail instead
/// until the failure is cleared.
pub struct MockChainRunner {
    result: Value,
    fail_on_interface: Mutex<Option<String>>,
    adds: Mutex<Vec<ChainInvocation>>,
    deletes: Mutex<Vec<ChainInvocation>>,
}

impl MockChainRunner {
    pub fn returning(result: Value) -> Self {
        Self {
            result,
            fail_on_interface: Mutex::new(None),
            adds: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on_interface(result: Value, interface: &str) -> Self {
        Self {
            fail_on_interface: Mutex::new(Some(interface.to_string())),
            ..Self::returning(result)
        }
    }

    pub fn clear_failure(&self) {
        *self.fail_on_interface.lock().unwrap() = None;
    }

    fn fails(&self, invocation: &ChainInvocation) -> bool {
        self.fail_on_interface.lock().unwrap().as_deref()
            == Some(invocation.interface_name.as_str())
    }

    pub fn adds(&self) -> Vec<ChainInvocation> {
        self.adds.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<ChainInvocation> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainRunner for MockChainRunner {
    async fn add(
        &self,
        invocation: &ChainInvocation,
        _network: &NetworkConfigList,
    ) -> Result<Value> {
        if self.fails(invocation) {
            bail!("injected failure for interface '{}'", invocation.interface_name);
        }
        self.adds.lock().unwrap().push(invocation.clone());
        Ok(self.result.clone())
    }

    async fn delete(
        &self,
        invocation: &ChainInvocation,
        _network: &NetworkConfigList,
        _prev_result: Option<&Value>,
    ) -> Result<()> {
        if self.fails(invocation) {
            bail!("injected failure for interface '{}'", invocation.interface_name);
        }
        self.deletes.lock().unwrap().push(invocation.clone());
        Ok(())
    }
}

/// In-memory `ClaimStore`. Claims and pods are looked up by
/// (namespace, name); status updates overwrite the stored claim.
#[derive(Default)]
pub struct MemoryStore {
    claims: DashMap<(String, String), ResourceClaim>,
    pods: DashMap<(String, String), Pod>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_claim(&self, claim: ResourceClaim) {
        let key = (
            claim.metadata.namespace.clone().unwrap_or_default(),
            claim.metadata.name.clone().unwrap_or_default(),
        );
        self.claims.insert(key, claim);
    }

    pub fn insert_pod(&self, pod: Pod) {
        let key = (
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.pods.insert(key, pod);
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<ResourceClaim> {
        self.claims
            .get(&(namespace.to_string(), name.to_string()))
            .map(|c| c.clone())
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ResourceClaim, Report<KubernetesError>> {
        self.claim(namespace, name)
            .ok_or_else(|| {
                Report::new(KubernetesError::ClaimNotFound {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                })
            })
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<KubernetesError>> {
        self.pods
            .get(&(namespace.to_string(), name.to_string()))
            .map(|p| p.clone())
            .ok_or_else(|| {
                Report::new(KubernetesError::PodNotFound {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                })
            })
    }

    async fn update_claim_status(
        &self,
        claim: &ResourceClaim,
    ) -> Result<ResourceClaim, Report<KubernetesError>> {
        let namespace = claim.metadata.namespace.clone().unwrap_or_default();
        let name = claim.metadata.name.clone().unwrap_or_default();
        if self.claim(&namespace, &name).is_none() {
            return Err(Report::new(KubernetesError::StatusUpdateFailed {
                name,
                namespace,
            }));
        }
        self.insert_claim(claim.clone());
        Ok(claim.clone())
    }
}
