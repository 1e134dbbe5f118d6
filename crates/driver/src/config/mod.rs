mod cli;

pub use cli::Cli;
pub use cli::Commands;
pub use cli::RunArgs;

/// Name under which this driver registers with the kubelet. A resource claim
/// belongs to this driver only when both its allocation result and its opaque
/// device configuration carry this name.
pub const DRIVER_NAME: &str = "dra.networking";

/// Socket file name the OCI hook binary dials inside the hook directory.
pub const OCI_HOOK_SOCKET_NAME: &str = "oci-hook-callback.sock";

/// Socket file name for the DRA plugin endpoint inside the per-driver
/// kubelet plugins directory.
pub const NODE_PLUGIN_SOCKET_NAME: &str = "dra.sock";
