//! Process bootstrap: builds the shared state, starts the gRPC servers and
//! the optional runtime event subscription, and drives graceful shutdown.

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::dra::v1beta1::dra_plugin_server::DraPluginServer;
use crate::api::ocihook::v1alpha1::oci_hook_server::OciHookServer;
use crate::api::registration::registration_server::RegistrationServer;
use crate::cni::AttachmentEngine;
use crate::cni::ExecChainRunner;
use crate::config::RunArgs;
use crate::config::DRIVER_NAME;
use crate::dra::NodeService;
use crate::dra::Registrar;
use crate::grpc::connect_uds;
use crate::grpc::serve_on_socket;
use crate::index::ClaimIndex;
use crate::k8s::init_kube_client;
use crate::k8s::report_err;
use crate::k8s::KubeClaimStore;
use crate::sandbox::OciHookCallback;
use crate::sandbox::RuntimeEventSubscriber;
use crate::sandbox::SandboxEvents;
use crate::sandbox::SandboxResolver;
use crate::status::StatusWriter;

pub async fn run(args: RunArgs) -> Result<()> {
    info!(driver = DRIVER_NAME, "starting network DRA node driver");

    let client = init_kube_client(args.kubeconfig.clone())
        .await
        .map_err(report_err)?;
    let store = Arc::new(KubeClaimStore::new(client));
    let index = Arc::new(ClaimIndex::new());

    let runner = Arc::new(ExecChainRunner::new(
        args.cni_bin_path.clone(),
        args.cni_exec_root.clone(),
    ));
    let status_writer = StatusWriter::new(store.clone());
    let engine = AttachmentEngine::new(DRIVER_NAME.to_string(), runner, Some(status_writer));
    let events = Arc::new(SandboxEvents::new(
        engine,
        index.clone(),
        store.clone(),
        DRIVER_NAME.to_string(),
    ));

    let cri_channel = connect_uds(args.cri_socket_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to connect CRI runtime socket {}",
                args.cri_socket_path.display()
            )
        })?;
    let resolver = SandboxResolver::new(cri_channel.clone());

    let token = CancellationToken::new();
    let mut tasks: Vec<(&str, JoinHandle<Result<()>>)> = Vec::new();

    let node_service = NodeService::new(DRIVER_NAME.to_string(), store, index, events.clone());
    tasks.push((
        "dra plugin server",
        tokio::spawn(serve_on_socket(
            args.node_plugin_socket(),
            DraPluginServer::new(node_service),
            token.clone(),
        )),
    ));

    let registrar = Registrar::new(DRIVER_NAME.to_string(), args.node_plugin_socket());
    tasks.push((
        "registration server",
        tokio::spawn(serve_on_socket(
            args.registration_socket(),
            RegistrationServer::new(registrar),
            token.clone(),
        )),
    ));

    let hook = OciHookCallback::new(events.clone(), resolver.clone());
    tasks.push((
        "oci hook server",
        tokio::spawn(serve_on_socket(
            args.oci_hook_socket(),
            OciHookServer::new(hook),
            token.clone(),
        )),
    ));

    if args.enable_cri_events {
        let subscriber = RuntimeEventSubscriber::new(events, resolver, cri_channel);
        tasks.push((
            "runtime event subscriber",
            tokio::spawn(subscriber.run(token.clone())),
        ));
    }

    wait_for_shutdown_signal().await?;
    info!("shutdown signal received");
    token.cancel();

    for (name, task) in tasks {
        task.await
            .with_context(|| format!("{name} panicked"))?
            .with_context(|| format!("{name} failed"))?;
    }

    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to wait for SIGINT")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}
