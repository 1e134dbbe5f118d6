use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use crate::k8s::KubernetesError;

/// Builds the Kubernetes client, from an explicit kubeconfig when one is
/// given, otherwise from the in-cluster environment (or `~/.kube/config`).
pub async fn init_kube_client(
    kubeconfig: Option<PathBuf>,
) -> Result<Client, Report<KubernetesError>> {
    let Some(path) = kubeconfig else {
        return Client::try_default()
            .await
            .change_context(KubernetesError::ConnectionFailed {
                message: "Failed to create Kubernetes client".to_string(),
            });
    };

    let connection_failed = || KubernetesError::ConnectionFailed {
        message: format!("Failed to build client from kubeconfig: {}", path.display()),
    };

    let kubeconfig = Kubeconfig::read_from(&path).change_context_lazy(connection_failed)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context_lazy(connection_failed)?;

    Client::try_from(config).change_context_lazy(connection_failed)
}
