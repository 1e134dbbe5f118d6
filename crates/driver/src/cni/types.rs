use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Decoded opaque device configuration of a claim: the embedded plugin-chain
/// document plus the target interface name. Immutable per claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentParameters {
    pub config: NetworkConfigList,
    pub interface: String,
}

/// CNI network configuration list (conflist). Plugin entries stay opaque
/// JSON; the invoker only injects `name`, `cniVersion` and `prevResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfigList {
    pub cni_version: String,
    pub name: String,
    #[serde(default)]
    pub plugins: Vec<Value>,
}

/// CNI add result, the fields this driver reads. The raw JSON value is kept
/// alongside for the claim's status history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    pub cni_version: Option<String>,
    pub interfaces: Option<Vec<CniInterface>>,
    pub ips: Option<Vec<CniIpConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CniInterface {
    pub name: String,
    pub mac: Option<String>,
    /// Set only on interfaces living inside the pod sandbox.
    pub sandbox: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CniIpConfig {
    pub address: String,
    pub gateway: Option<String>,
    pub interface: Option<usize>,
}

/// Structured error a CNI plugin prints on stdout when it fails.
#[derive(Debug, Clone, Deserialize)]
pub struct CniErrorMsg {
    pub code: u32,
    pub msg: String,
    pub details: Option<String>,
}

impl fmt::Display for CniErrorMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CNI error code {}: {}", self.code, self.msg)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}
