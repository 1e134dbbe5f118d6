use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;
use anyhow::Result;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tracing::info;
use tracing::warn;

use crate::api::dra::v1beta1::dra_plugin_server::DraPlugin;
use crate::api::dra::v1beta1::Claim;
use crate::api::dra::v1beta1::Device;
use crate::api::dra::v1beta1::NodePrepareResourceResponse;
use crate::api::dra::v1beta1::NodePrepareResourcesRequest;
use crate::api::dra::v1beta1::NodePrepareResourcesResponse;
use crate::api::dra::v1beta1::NodeUnprepareResourceResponse;
use crate::api::dra::v1beta1::NodeUnprepareResourcesRequest;
use crate::api::dra::v1beta1::NodeUnprepareResourcesResponse;
use crate::index::ClaimIndex;
use crate::k8s::index_owned_claim;
use crate::k8s::report_err;
use crate::k8s::ClaimStore;
use crate::sandbox::SandboxEvents;

/// DRA node plugin service: populates the claim index on prepare; on
/// unprepare, clears the index and releases any interfaces still recorded
/// for the claim. Every claim in a batch is processed independently; one
/// claim's failure only poisons its own response slot.
pub struct NodeService {
    driver_name: String,
    store: Arc<dyn ClaimStore>,
    index: Arc<ClaimIndex>,
    events: Arc<SandboxEvents>,
}

impl NodeService {
    pub fn new(
        driver_name: String,
        store: Arc<dyn ClaimStore>,
        index: Arc<ClaimIndex>,
        events: Arc<SandboxEvents>,
    ) -> Self {
        Self {
            driver_name,
            store,
            index,
            events,
        }
    }

    /// Fetches and verifies one claim, indexes it per pod consumer, and
    /// returns the devices its allocation grants. A claim this driver does
    /// not own yields an empty device list and is not indexed.
    async fn prepare_claim(&self, claim_ref: &Claim) -> Result<Vec<Device>> {
        let claim = self
            .store
            .get_claim(&claim_ref.namespace, &claim_ref.name)
            .await
            .map_err(report_err)?;

        if claim.metadata.uid.as_deref() != Some(claim_ref.uid.as_str()) {
            bail!(
                "resource claim '{}/{}' has been replaced (expected uid {})",
                claim_ref.namespace,
                claim_ref.name,
                claim_ref.uid
            );
        }

        let Some(allocation) = claim
            .status
            .as_ref()
            .and_then(|status| status.allocation.as_ref())
        else {
            bail!(
                "resource claim '{}/{}' has no allocation",
                claim_ref.namespace,
                claim_ref.name
            );
        };

        if !index_owned_claim(&self.index, &self.driver_name, &claim) {
            return Ok(Vec::new());
        }

        let devices = allocation
            .devices
            .as_ref()
            .and_then(|devices| devices.results.as_ref())
            .map(|results| {
                results
                    .iter()
                    .map(|result| Device {
                        request_names: if result.request.is_empty() {
                            Vec::new()
                        } else {
                            vec![result.request.clone()]
                        },
                        pool_name: result.pool.clone(),
                        device_name: result.device.clone(),
                        cdi_device_ids: Vec::new(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(devices)
    }
}

#[tonic::async_trait]
impl DraPlugin for NodeService {
    async fn node_prepare_resources(
        &self,
        request: Request<NodePrepareResourcesRequest>,
    ) -> Result<Response<NodePrepareResourcesResponse>, Status> {
        let request = request.into_inner();
        info!(claims = request.claims.len(), "NodePrepareResources");

        let mut claims = HashMap::new();
        for claim_ref in &request.claims {
            let slot = match self.prepare_claim(claim_ref).await {
                Ok(devices) => NodePrepareResourceResponse {
                    devices,
                    error: String::new(),
                },
                Err(err) => {
                    warn!(
                        claim = %claim_ref.name,
                        namespace = %claim_ref.namespace,
                        "failed to prepare resource claim: {err:#}"
                    );
                    NodePrepareResourceResponse {
                        devices: Vec::new(),
                        error: format!("{err:#}"),
                    }
                }
            };
            claims.insert(claim_ref.uid.clone(), slot);
        }

        Ok(Response::new(NodePrepareResourcesResponse { claims }))
    }

    async fn node_unprepare_resources(
        &self,
        request: Request<NodeUnprepareResourcesRequest>,
    ) -> Result<Response<NodeUnprepareResourcesResponse>, Status> {
        let request = request.into_inner();
        info!(claims = request.claims.len(), "NodeUnprepareResources");

        let mut claims = HashMap::new();
        for claim_ref in &request.claims {
            self.index.remove_claim(&claim_ref.uid);
            let error = match self
                .events
                .release_claim(&claim_ref.namespace, &claim_ref.name)
                .await
            {
                Ok(()) => String::new(),
                Err(err) => {
                    warn!(
                        claim = %claim_ref.name,
                        namespace = %claim_ref.namespace,
                        "failed to release claim attachments: {err:#}"
                    );
                    format!("{err:#}")
                }
            };
            claims.insert(claim_ref.uid.clone(), NodeUnprepareResourceResponse { error });
        }

        Ok(Response::new(NodeUnprepareResourcesResponse { claims }))
    }
}
