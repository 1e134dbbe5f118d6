//! CNI plugin-chain types, invocation, and the per-claim attachment engine.

mod engine;
mod invoke;
mod types;

pub use engine::AttachmentEngine;
pub use engine::AttachmentRecord;
pub use engine::SandboxContext;
pub use invoke::ChainInvocation;
pub use invoke::ChainRunner;
pub use invoke::ExecChainRunner;
pub use types::AttachmentParameters;
pub use types::CniInterface;
pub use types::CniIpConfig;
pub use types::CniResult;
pub use types::NetworkConfigList;
