use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

use crate::config::DRIVER_NAME;
use crate::config::NODE_PLUGIN_SOCKET_NAME;
use crate::config::OCI_HOOK_SOCKET_NAME;

#[derive(Parser)]
#[command(about, long_about = None, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the network DRA node driver
    Run(Box<RunArgs>),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to the kubelet driver plugin directory.
    #[arg(long, default_value = "/var/lib/kubelet/plugins")]
    pub driver_plugin_path: PathBuf,

    /// Path to the kubelet plugin registration directory.
    #[arg(long, default_value = "/var/lib/kubelet/plugins_registry")]
    pub plugin_registration_path: PathBuf,

    /// Directory holding the OCI hook callback socket.
    #[arg(long, default_value = "/dranet-oci-hook")]
    pub oci_hook_path: PathBuf,

    /// CRI runtime socket path.
    #[arg(long, default_value = "/run/containerd/containerd.sock")]
    pub cri_socket_path: PathBuf,

    /// Directory searched for CNI plugin binaries, resolved inside the
    /// execution root.
    #[arg(long, default_value = "/opt/cni/bin")]
    pub cni_bin_path: PathBuf,

    /// Execution root the CNI plugin chain is chrooted into.
    #[arg(long, default_value = "/")]
    pub cni_exec_root: PathBuf,

    /// Path to a kubeconfig file. Defaults to in-cluster configuration.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Subscribe to CRI sandbox lifecycle events instead of relying on the
    /// OCI hook callback for attachment triggers.
    #[arg(long, default_value_t = false)]
    pub enable_cri_events: bool,
}

impl RunArgs {
    /// Socket serving the kubelet DRA plugin protocol.
    pub fn node_plugin_socket(&self) -> PathBuf {
        self.driver_plugin_path
            .join(DRIVER_NAME)
            .join(NODE_PLUGIN_SOCKET_NAME)
    }

    /// Socket the kubelet registration watcher discovers.
    pub fn registration_socket(&self) -> PathBuf {
        self.plugin_registration_path
            .join(format!("{DRIVER_NAME}.sock"))
    }

    /// Socket the OCI hook binary calls back on.
    pub fn oci_hook_socket(&self) -> PathBuf {
        self.oci_hook_path.join(OCI_HOOK_SOCKET_NAME)
    }
}
