//! Sandbox lifecycle bridge: one core attach/detach operation fed by two
//! front-ends (the OCI hook callback and the CRI event subscription).

mod hook;
mod resolve;
mod runtime_events;

pub use hook::OciHookCallback;
pub use resolve::SandboxResolver;
pub use runtime_events::RuntimeEventSubscriber;

use std::sync::Arc;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use dashmap::DashMap;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::cni::AttachmentEngine;
use crate::cni::AttachmentRecord;
use crate::cni::SandboxContext;
use crate::index::ClaimIndex;
use crate::k8s::index_owned_claim;
use crate::k8s::ClaimStore;

/// One namespace of a sandbox, as reported by the runtime spec.
#[derive(Debug, Clone)]
pub struct NamespaceDescriptor {
    pub kind: String,
    pub path: String,
}

/// Sandbox identity and namespaces, assembled by a front-end before the
/// core operation runs.
#[derive(Debug, Clone)]
pub struct SandboxDescriptor {
    pub id: String,
    pub uid: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub namespaces: Vec<NamespaceDescriptor>,
}

impl SandboxDescriptor {
    fn network_namespace(&self) -> Option<&str> {
        self.namespaces
            .iter()
            .find(|namespace| namespace.kind == "network")
            .map(|namespace| namespace.path.as_str())
    }
}

/// Core of the lifecycle bridge. Both front-ends funnel into
/// `on_sandbox_created` / `on_sandbox_removed`; neither carries its own
/// attachment logic.
pub struct SandboxEvents {
    engine: AttachmentEngine,
    index: Arc<ClaimIndex>,
    store: Arc<dyn ClaimStore>,
    driver_name: String,
    /// Interfaces attached per sandbox ID, kept for teardown. A retried
    /// sandbox carries a fresh ID and starts with no records.
    attachments: DashMap<String, Vec<AttachmentRecord>>,
}

impl SandboxEvents {
    pub fn new(
        engine: AttachmentEngine,
        index: Arc<ClaimIndex>,
        store: Arc<dyn ClaimStore>,
        driver_name: String,
    ) -> Self {
        Self {
            engine,
            index,
            store,
            driver_name,
            attachments: DashMap::new(),
        }
    }

    /// Attaches every indexed claim of the sandbox, in prepare order. The
    /// first failing claim aborts the rest and fails the sandbox creation;
    /// there is no partial success towards the runtime. A repeated event for
    /// the same sandbox resumes with the claims not yet attached, so a retry
    /// after a partial failure never reports success while claims are
    /// missing.
    pub async fn on_sandbox_created(&self, sandbox: &SandboxDescriptor) -> Result<()> {
        let netns_path = sandbox.network_namespace().with_context(|| {
            format!(
                "no network namespace for sandbox of pod '{}' in namespace '{}'",
                sandbox.pod_name, sandbox.pod_namespace
            )
        })?;

        self.recover_missing_claims(sandbox).await;

        let context = SandboxContext {
            sandbox_id: sandbox.id.clone(),
            sandbox_uid: sandbox.uid.clone(),
            pod_name: sandbox.pod_name.clone(),
            pod_namespace: sandbox.pod_namespace.clone(),
            netns_path: netns_path.to_string(),
        };

        let mut records = self
            .attachments
            .remove(&sandbox.id)
            .map(|(_, records)| records)
            .unwrap_or_default();

        for claim in self.index.get(&sandbox.uid) {
            let claim_name = claim.metadata.name.as_deref().unwrap_or_default();
            let claim_namespace = claim.metadata.namespace.as_deref().unwrap_or_default();
            if records.iter().any(|record| {
                record.claim_name == claim_name && record.claim_namespace == claim_namespace
            }) {
                debug!(
                    claim = claim_name,
                    sandbox_id = %sandbox.id,
                    "claim already attached to sandbox, skipping"
                );
                continue;
            }
            match self.engine.attach(&context, &claim).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => {
                    // Keep what already attached so teardown can release it.
                    if !records.is_empty() {
                        self.attachments.insert(sandbox.id.clone(), records);
                    }
                    return Err(err).with_context(|| {
                        format!(
                            "failed to attach networks for pod '{}' (uid {}) in namespace '{}'",
                            sandbox.pod_name, sandbox.uid, sandbox.pod_namespace
                        )
                    });
                }
            }
        }

        if !records.is_empty() {
            self.attachments.insert(sandbox.id.clone(), records);
        }
        Ok(())
    }

    /// Re-fetches claims referenced by the pod spec but absent from the
    /// index, covering claims prepared before this process started. Lookup
    /// failures leave the index as the source of truth.
    async fn recover_missing_claims(&self, sandbox: &SandboxDescriptor) {
        let pod = match self
            .store
            .get_pod(&sandbox.pod_namespace, &sandbox.pod_name)
            .await
        {
            Ok(pod) => pod,
            Err(err) => {
                warn!(
                    pod = %sandbox.pod_name,
                    namespace = %sandbox.pod_namespace,
                    "could not look up pod for claim recovery: {err}"
                );
                return;
            }
        };

        let claim_statuses = pod
            .status
            .as_ref()
            .and_then(|status| status.resource_claim_statuses.as_deref())
            .unwrap_or_default();

        for entry in pod
            .spec
            .as_ref()
            .and_then(|spec| spec.resource_claims.as_deref())
            .unwrap_or_default()
        {
            // Template-generated claims publish their name in the pod status.
            let claim_name = entry.resource_claim_name.as_deref().or_else(|| {
                claim_statuses
                    .iter()
                    .find(|status| status.name == entry.name)
                    .and_then(|status| status.resource_claim_name.as_deref())
            });
            let Some(claim_name) = claim_name else {
                continue;
            };
            if self.index.contains_claim_named(&sandbox.uid, claim_name) {
                continue;
            }

            match self.store.get_claim(&sandbox.pod_namespace, claim_name).await {
                Ok(claim) => {
                    if index_owned_claim(&self.index, &self.driver_name, &claim) {
                        info!(
                            pod = %sandbox.pod_name,
                            claim = claim_name,
                            "recovered claim missing from the index"
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        pod = %sandbox.pod_name,
                        claim = claim_name,
                        "could not fetch claim for recovery: {err}"
                    );
                }
            }
        }
    }

    /// Releases every interface attached for the sandbox, in reverse attach
    /// order, then drops its records and the pod's index entry. A single
    /// failed release does not stop the others.
    pub async fn on_sandbox_removed(&self, sandbox_id: &str, sandbox_uid: &str) -> Result<()> {
        let records = self
            .attachments
            .remove(sandbox_id)
            .map(|(_, records)| records)
            .unwrap_or_default();

        let mut failures = 0;
        for record in records.iter().rev() {
            if let Err(err) = self.engine.detach(record).await {
                failures += 1;
                warn!(
                    sandbox_id,
                    claim = %record.claim_name,
                    "failed to detach network: {err:#}"
                );
            }
        }

        self.index.delete(sandbox_uid);

        if failures > 0 {
            bail!(
                "failed to detach {failures} of {} networks for sandbox {sandbox_id}",
                records.len()
            );
        }
        Ok(())
    }

    /// Detaches and forgets every attachment recorded for one claim, across
    /// all sandboxes. Backs the unprepare path, which is the only teardown
    /// trigger when no runtime event subscription is running.
    pub async fn release_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let mut released = Vec::new();
        self.attachments.retain(|_, records| {
            let mut kept = Vec::new();
            for record in records.drain(..) {
                if record.claim_name == name && record.claim_namespace == namespace {
                    released.push(record);
                } else {
                    kept.push(record);
                }
            }
            *records = kept;
            !records.is_empty()
        });

        let mut failures = 0;
        for record in released.iter().rev() {
            if let Err(err) = self.engine.detach(record).await {
                failures += 1;
                warn!(
                    claim = name,
                    namespace, "failed to detach network on unprepare: {err:#}"
                );
            }
        }

        if failures > 0 {
            bail!(
                "failed to detach {failures} of {} networks for claim '{namespace}/{name}'",
                released.len()
            );
        }
        Ok(())
    }
}
