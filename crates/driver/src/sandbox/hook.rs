use std::sync::Arc;

use tonic::Request;
use tonic::Response;
use tonic::Status;
use tracing::error;
use tracing::info;

use crate::api::ocihook::v1alpha1::oci_hook_server::OciHook;
use crate::api::ocihook::v1alpha1::CreateRuntimeRequest;
use crate::api::ocihook::v1alpha1::CreateRuntimeResponse;

use super::SandboxEvents;
use super::SandboxResolver;

/// gRPC callback target of the createRuntime OCI hook binary injected into
/// sandbox bundles. Failing the callback fails the hook, which fails the
/// sandbox creation in the runtime.
pub struct OciHookCallback {
    events: Arc<SandboxEvents>,
    resolver: SandboxResolver,
}

impl OciHookCallback {
    pub fn new(events: Arc<SandboxEvents>, resolver: SandboxResolver) -> Self {
        Self { events, resolver }
    }
}

#[tonic::async_trait]
impl OciHook for OciHookCallback {
    async fn create_runtime(
        &self,
        request: Request<CreateRuntimeRequest>,
    ) -> Result<Response<CreateRuntimeResponse>, Status> {
        let request = request.into_inner();
        info!(container_id = %request.container_id, "createRuntime hook callback");

        let sandbox = self
            .resolver
            .resolve(&request.container_id)
            .await
            .map_err(|err| {
                error!(container_id = %request.container_id, "failed to resolve sandbox: {err:#}");
                Status::internal(format!("{err:#}"))
            })?;

        self.events
            .on_sandbox_created(&sandbox)
            .await
            .map_err(|err| {
                error!(
                    pod = %sandbox.pod_name,
                    namespace = %sandbox.pod_namespace,
                    "failed to attach networks: {err:#}"
                );
                Status::internal(format!("{err:#}"))
            })?;

        Ok(Response::new(CreateRuntimeResponse {}))
    }
}
