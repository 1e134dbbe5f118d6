use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::api::cri::runtime_service_client::RuntimeServiceClient;
use crate::api::cri::ContainerEventResponse;
use crate::api::cri::ContainerEventType;
use crate::api::cri::GetEventsRequest;

use super::SandboxEvents;
use super::SandboxResolver;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Alternate front-end driving the lifecycle bridge from the CRI container
/// event stream instead of OCI hook callbacks. Unlike the hook, a failed
/// attachment cannot fail the sandbox here; it is only logged.
pub struct RuntimeEventSubscriber {
    events: Arc<SandboxEvents>,
    resolver: SandboxResolver,
    client: RuntimeServiceClient<Channel>,
}

impl RuntimeEventSubscriber {
    pub fn new(events: Arc<SandboxEvents>, resolver: SandboxResolver, channel: Channel) -> Self {
        Self {
            events,
            resolver,
            client: RuntimeServiceClient::new(channel),
        }
    }

    /// Consumes the event stream until cancellation, resubscribing after
    /// stream errors.
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("stopping runtime event subscription");
                    return Ok(());
                }
                result = self.watch_events() => {
                    match result {
                        Ok(()) => warn!("runtime event stream closed, resubscribing"),
                        Err(err) => warn!("runtime event stream failed, resubscribing: {err:#}"),
                    }
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                }
            }
        }
    }

    async fn watch_events(&self) -> Result<()> {
        let mut stream = self
            .client
            .clone()
            .get_container_events(GetEventsRequest {})
            .await
            .context("GetContainerEvents subscription failed")?
            .into_inner();

        info!("subscribed to runtime container events");

        while let Some(event) = stream.message().await.context("event stream error")? {
            self.handle_event(event).await;
        }
        Ok(())
    }

    async fn handle_event(&self, event: ContainerEventResponse) {
        let Some(status) = event.pod_sandbox_status.as_ref() else {
            return;
        };
        // Container events inside the sandbox carry the same sandbox status;
        // only events about the sandbox itself matter here.
        if status.id != event.container_id {
            return;
        }

        match event.container_event_type() {
            ContainerEventType::ContainerCreatedEvent => {
                let sandbox = match self.resolver.resolve(&event.container_id).await {
                    Ok(sandbox) => sandbox,
                    Err(err) => {
                        error!(
                            sandbox_id = %event.container_id,
                            "failed to resolve created sandbox: {err:#}"
                        );
                        return;
                    }
                };
                if let Err(err) = self.events.on_sandbox_created(&sandbox).await {
                    error!(
                        pod = %sandbox.pod_name,
                        namespace = %sandbox.pod_namespace,
                        "failed to attach networks: {err:#}"
                    );
                }
            }
            ContainerEventType::ContainerDeletedEvent => {
                let uid = status
                    .metadata
                    .as_ref()
                    .map(|metadata| metadata.uid.as_str())
                    .unwrap_or_default();
                if uid.is_empty() {
                    return;
                }
                if let Err(err) = self
                    .events
                    .on_sandbox_removed(&event.container_id, uid)
                    .await
                {
                    warn!(
                        sandbox_id = %event.container_id,
                        "failed to release networks: {err:#}"
                    );
                }
            }
            ContainerEventType::ContainerStartedEvent
            | ContainerEventType::ContainerStoppedEvent => {}
        }
    }
}
