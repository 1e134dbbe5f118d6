//! Cluster object store access and the claim ownership model.

mod claims;
mod kube_client;
mod store;

pub use claims::evaluate_ownership;
pub use claims::index_owned_claim;
pub use claims::ClaimOwnership;
pub use claims::OwnedClaim;
pub use kube_client::init_kube_client;
pub use store::ClaimStore;
pub use store::KubeClaimStore;

use std::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Resource name of the only consumer kind this driver indexes claims for.
pub const POD_RESOURCE: &str = "pods";

#[derive(Debug, Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to get resource claim '{name}' in namespace '{namespace}'")]
    ClaimNotFound { name: String, namespace: String },
    #[display("Failed to get pod '{name}' in namespace '{namespace}'")]
    PodNotFound { name: String, namespace: String },
    #[display("Failed to update status of resource claim '{name}' in namespace '{namespace}'")]
    StatusUpdateFailed { name: String, namespace: String },
}

impl Error for KubernetesError {}

/// Flattens a report into an anyhow error at call-scoped boundaries (claim
/// slots in a batch response, sandbox-creation failures).
pub fn report_err(report: Report<KubernetesError>) -> anyhow::Error {
    anyhow::anyhow!("{report}")
}
