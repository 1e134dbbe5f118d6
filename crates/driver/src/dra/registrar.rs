use std::path::PathBuf;

use tonic::Request;
use tonic::Response;
use tonic::Status;
use tracing::info;
use tracing::warn;

use crate::api::registration::registration_server::Registration;
use crate::api::registration::InfoRequest;
use crate::api::registration::PluginInfo;
use crate::api::registration::RegistrationStatus;
use crate::api::registration::RegistrationStatusResponse;

/// Answers the kubelet's plugin discovery probe on the registration socket.
/// The handshake itself is driven by the kubelet's registry watcher.
pub struct Registrar {
    driver_name: String,
    endpoint: PathBuf,
}

impl Registrar {
    pub fn new(driver_name: String, endpoint: PathBuf) -> Self {
        Self {
            driver_name,
            endpoint,
        }
    }
}

#[tonic::async_trait]
impl Registration for Registrar {
    async fn get_info(
        &self,
        _request: Request<InfoRequest>,
    ) -> Result<Response<PluginInfo>, Status> {
        info!(driver = %self.driver_name, "kubelet requested plugin info");

        Ok(Response::new(PluginInfo {
            r#type: "DRAPlugin".to_string(),
            name: self.driver_name.clone(),
            endpoint: self.endpoint.display().to_string(),
            supported_versions: vec!["v1beta1".to_string()],
        }))
    }

    async fn notify_registration_status(
        &self,
        request: Request<RegistrationStatus>,
    ) -> Result<Response<RegistrationStatusResponse>, Status> {
        let status = request.into_inner();
        if status.plugin_registered {
            info!(driver = %self.driver_name, "registered with kubelet");
        } else {
            warn!(
                driver = %self.driver_name,
                error = %status.error,
                "kubelet rejected plugin registration"
            );
        }
        Ok(Response::new(RegistrationStatusResponse {}))
    }
}
