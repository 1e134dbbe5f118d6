use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use k8s_openapi::api::resource::v1beta1::ResourceClaim;
use serde_json::Value;
use tracing::debug;
use tracing::info;

use crate::cni::AttachmentParameters;
use crate::cni::ChainInvocation;
use crate::cni::ChainRunner;
use crate::cni::NetworkConfigList;
use crate::k8s::evaluate_ownership;
use crate::k8s::ClaimOwnership;
use crate::status::StatusWriter;

/// Identity of the sandbox a chain runs against.
#[derive(Debug, Clone)]
pub struct SandboxContext {
    pub sandbox_id: String,
    pub sandbox_uid: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub netns_path: String,
}

impl SandboxContext {
    /// Builds the per-plugin invocation context. The identity args are
    /// injected in the conventional order; plugins ignore unknown keys.
    fn chain_invocation(&self, interface_name: &str) -> ChainInvocation {
        ChainInvocation {
            container_id: self.sandbox_id.clone(),
            netns_path: self.netns_path.clone(),
            interface_name: interface_name.to_string(),
            args: vec![
                ("IgnoreUnknown".to_string(), "true".to_string()),
                (
                    "K8S_POD_NAMESPACE".to_string(),
                    self.pod_namespace.clone(),
                ),
                ("K8S_POD_NAME".to_string(), self.pod_name.clone()),
                (
                    "K8S_POD_INFRA_CONTAINER_ID".to_string(),
                    self.sandbox_id.clone(),
                ),
                ("K8S_POD_UID".to_string(), self.sandbox_uid.clone()),
            ],
        }
    }
}

/// Everything needed to undo one successful attachment later.
#[derive(Debug, Clone)]
pub struct AttachmentRecord {
    pub claim_name: String,
    pub claim_namespace: String,
    pub invocation: ChainInvocation,
    pub network: NetworkConfigList,
    /// Final raw add result, replayed as `prevResult` on delete.
    pub result: Value,
}

/// Decodes per-claim attachment parameters and drives the plugin chain for
/// one sandbox.
pub struct AttachmentEngine {
    driver_name: String,
    runner: Arc<dyn ChainRunner>,
    status_writer: Option<StatusWriter>,
}

impl AttachmentEngine {
    pub fn new(
        driver_name: String,
        runner: Arc<dyn ChainRunner>,
        status_writer: Option<StatusWriter>,
    ) -> Self {
        Self {
            driver_name,
            runner,
            status_writer,
        }
    }

    /// Attaches one claim's network to the sandbox. Returns `None` when the
    /// claim is not handled by this driver (silently skipped, not an error).
    pub async fn attach(
        &self,
        sandbox: &SandboxContext,
        claim: &ResourceClaim,
    ) -> Result<Option<AttachmentRecord>> {
        let claim_name = claim.metadata.name.as_deref().unwrap_or_default();

        let owned = match evaluate_ownership(claim, &self.driver_name) {
            ClaimOwnership::Owned(owned) => owned,
            ClaimOwnership::NotMine => {
                debug!(claim = claim_name, "claim is not handled by this driver");
                return Ok(None);
            }
        };

        let parameters: AttachmentParameters =
            serde_json::from_value(owned.config.parameters.0.clone()).with_context(|| {
                format!("malformed attachment parameters on claim '{claim_name}'")
            })?;

        let invocation = sandbox.chain_invocation(&parameters.interface);
        let result = self
            .runner
            .add(&invocation, &parameters.config)
            .await
            .with_context(|| {
                format!(
                    "failed to attach network '{}' for claim '{claim_name}'",
                    parameters.config.name
                )
            })?;

        info!(
            claim = claim_name,
            pod = %sandbox.pod_name,
            interface = %parameters.interface,
            "attached network"
        );

        if let Some(writer) = &self.status_writer {
            // The interface exists at this point; a writeback failure is
            // still the claim's error so the caller sees the inconsistency.
            writer.update(claim, &result).await.with_context(|| {
                format!("network attached but status update failed for claim '{claim_name}'")
            })?;
        }

        Ok(Some(AttachmentRecord {
            claim_name: claim_name.to_string(),
            claim_namespace: claim.metadata.namespace.clone().unwrap_or_default(),
            invocation,
            network: parameters.config,
            result,
        }))
    }

    /// Releases one previously attached network.
    pub async fn detach(&self, record: &AttachmentRecord) -> Result<()> {
        self.runner
            .delete(&record.invocation, &record.network, Some(&record.result))
            .await
            .with_context(|| {
                format!(
                    "failed to detach network '{}' for claim '{}'",
                    record.network.name, record.claim_name
                )
            })?;

        info!(
            claim = %record.claim_name,
            interface = %record.invocation.interface_name,
            "detached network"
        );
        Ok(())
    }
}
