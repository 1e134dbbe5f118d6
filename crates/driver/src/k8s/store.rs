use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::resource::v1beta1::ResourceClaim;
use kube::api::PostParams;
use kube::Api;
use kube::Client;

use crate::k8s::KubernetesError;

/// Cluster object store boundary: claim and pod reads, status-only claim
/// writes. Remote calls may block; callers must not hold index guards across
/// them.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ResourceClaim, Report<KubernetesError>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<KubernetesError>>;

    /// Replaces the claim's status subresource with the status carried by
    /// `claim`. Last write wins from this driver's perspective; a conflict
    /// reported by the API server is surfaced to the caller.
    async fn update_claim_status(
        &self,
        claim: &ResourceClaim,
    ) -> Result<ResourceClaim, Report<KubernetesError>>;
}

/// `ClaimStore` backed by the real API server.
pub struct KubeClaimStore {
    client: Client,
}

impl KubeClaimStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn claims(&self, namespace: &str) -> Api<ResourceClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClaimStore for KubeClaimStore {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ResourceClaim, Report<KubernetesError>> {
        self.claims(namespace)
            .get(name)
            .await
            .change_context(KubernetesError::ClaimNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Report<KubernetesError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .change_context(KubernetesError::PodNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn update_claim_status(
        &self,
        claim: &ResourceClaim,
    ) -> Result<ResourceClaim, Report<KubernetesError>> {
        let name = claim.metadata.name.clone().unwrap_or_default();
        let namespace = claim.metadata.namespace.clone().unwrap_or_default();
        let status_update_failed = || KubernetesError::StatusUpdateFailed {
            name: name.clone(),
            namespace: namespace.clone(),
        };

        let body = serde_json::to_vec(claim).change_context_lazy(status_update_failed)?;

        self.claims(&namespace)
            .replace_status(&name, &PostParams::default(), body)
            .await
            .change_context_lazy(status_update_failed)
    }
}
