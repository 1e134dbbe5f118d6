use std::collections::HashMap;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use tonic::transport::Channel;

use crate::api::cri::runtime_service_client::RuntimeServiceClient;
use crate::api::cri::PodSandboxStatusRequest;

use super::NamespaceDescriptor;
use super::SandboxDescriptor;

/// Resolves a sandbox ID into pod identity and namespace paths through the
/// CRI runtime service. The namespace paths only appear in the verbose
/// status info blob, not in the structured status.
#[derive(Clone)]
pub struct SandboxResolver {
    client: RuntimeServiceClient<Channel>,
}

impl SandboxResolver {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: RuntimeServiceClient::new(channel),
        }
    }

    pub async fn resolve(&self, sandbox_id: &str) -> Result<SandboxDescriptor> {
        let response = self
            .client
            .clone()
            .pod_sandbox_status(PodSandboxStatusRequest {
                pod_sandbox_id: sandbox_id.to_string(),
                verbose: true,
            })
            .await
            .with_context(|| format!("PodSandboxStatus failed for sandbox {sandbox_id}"))?
            .into_inner();

        let Some(status) = response.status else {
            bail!("runtime returned no status for sandbox {sandbox_id}");
        };
        let Some(metadata) = status.metadata else {
            bail!("runtime returned no metadata for sandbox {sandbox_id}");
        };

        let namespaces = namespaces_from_info(&response.info)
            .with_context(|| format!("failed to read namespaces of sandbox {sandbox_id}"))?;

        Ok(SandboxDescriptor {
            id: status.id,
            uid: metadata.uid,
            pod_name: metadata.name,
            pod_namespace: metadata.namespace,
            namespaces,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SandboxInfo {
    #[serde(default)]
    runtime_spec: Option<RuntimeSpec>,
}

#[derive(Deserialize)]
struct RuntimeSpec {
    #[serde(default)]
    linux: Option<LinuxSpec>,
}

#[derive(Deserialize)]
struct LinuxSpec {
    #[serde(default)]
    namespaces: Vec<OciNamespace>,
}

#[derive(Deserialize)]
struct OciNamespace {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    path: String,
}

/// Parses the OCI runtime spec out of the verbose status info map. The
/// runtime stores it as a JSON document under the "info" key.
fn namespaces_from_info(info: &HashMap<String, String>) -> Result<Vec<NamespaceDescriptor>> {
    let Some(blob) = info.get("info") else {
        bail!("verbose sandbox status carries no info blob");
    };

    let info: SandboxInfo =
        serde_json::from_str(blob).context("failed to decode sandbox info blob")?;

    let namespaces = info
        .runtime_spec
        .and_then(|spec| spec.linux)
        .map(|linux| linux.namespaces)
        .unwrap_or_default();

    Ok(namespaces
        .into_iter()
        .map(|namespace| NamespaceDescriptor {
            kind: namespace.kind,
            path: namespace.path,
        })
        .collect())
}
