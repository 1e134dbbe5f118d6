//! Unix-socket plumbing shared by the gRPC servers and clients.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::body::BoxBody;
use tonic::codegen::http;
use tonic::server::NamedService;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tower::service_fn;
use tracing::info;

/// Serves one gRPC service on a unix socket until cancellation. A stale
/// socket from a previous run is removed before binding.
pub async fn serve_on_socket<S>(
    socket_path: PathBuf,
    service: S,
    cancellation_token: CancellationToken,
) -> Result<()>
where
    S: tower::Service<
            http::Request<BoxBody>,
            Response = http::Response<BoxBody>,
            Error = std::convert::Infallible,
        > + NamedService
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create socket directory {}", parent.display()))?;
    }
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .with_context(|| format!("failed to remove stale socket {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;

    info!(service = S::NAME, socket = %socket_path.display(), "gRPC server listening");

    tonic::transport::Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async move {
            cancellation_token.cancelled().await;
            info!(service = S::NAME, "shutting down gRPC server");
        })
        .await
        .context("gRPC server failed")?;

    Ok(())
}

/// Client channel over a unix socket.
pub async fn connect_uds(socket_path: PathBuf) -> Result<Channel> {
    // The HTTP URL is a placeholder since the connector dials the socket.
    let channel = Endpoint::from_static("http://tonic")
        .connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move {
                match UnixStream::connect(socket_path).await {
                    Ok(stream) => Ok(TokioIo::new(stream)),
                    Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
                }
            }
        }))
        .await
        .context("failed to connect unix socket channel")?;

    Ok(channel)
}
