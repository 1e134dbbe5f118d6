//! Kubelet-facing surface: the DRA node plugin service and the plugin
//! registration endpoint.

mod node;
mod registrar;

pub use node::NodeService;
pub use registrar::Registrar;
