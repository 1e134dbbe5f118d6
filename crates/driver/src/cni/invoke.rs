use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::cni::types::CniErrorMsg;
use crate::cni::NetworkConfigList;

/// A plugin that does not answer within this window is killed; the sandbox
/// creation call must not hang on a wedged binary.
const PLUGIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-sandbox context passed to every plugin of a chain.
#[derive(Debug, Clone)]
pub struct ChainInvocation {
    pub container_id: String,
    pub netns_path: String,
    pub interface_name: String,
    /// Identity key/value args, forwarded in insertion order.
    pub args: Vec<(String, String)>,
}

impl ChainInvocation {
    fn cni_args(&self) -> String {
        self.args
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Executes a plugin chain against a sandbox. The engine only depends on
/// this seam, so tests can substitute a recorder.
#[async_trait]
pub trait ChainRunner: Send + Sync {
    /// Runs the chain's "add" operation, plugins in list order, each seeing
    /// the previous plugin's result. Returns the final raw result.
    async fn add(&self, invocation: &ChainInvocation, network: &NetworkConfigList)
        -> Result<Value>;

    /// Runs the chain's "delete" operation in reverse order, handing every
    /// plugin the final add result as `prevResult`.
    async fn delete(
        &self,
        invocation: &ChainInvocation,
        network: &NetworkConfigList,
        prev_result: Option<&Value>,
    ) -> Result<()>;
}

/// `ChainRunner` that spawns the plugin binaries as subprocesses, chrooted
/// into a configured execution root so relative binary and IPAM paths
/// resolve inside a sandboxed filesystem tree.
pub struct ExecChainRunner {
    cni_bin_path: PathBuf,
    exec_root: PathBuf,
}

impl ExecChainRunner {
    pub fn new(cni_bin_path: PathBuf, exec_root: PathBuf) -> Self {
        Self {
            cni_bin_path,
            exec_root,
        }
    }

    /// Merges the chain-level fields a plugin expects into its own config
    /// object, the way libcni does before each invocation.
    fn plugin_config(
        network: &NetworkConfigList,
        plugin: &Value,
        prev_result: Option<&Value>,
    ) -> Result<Value> {
        let mut config = plugin.clone();
        let fields = config
            .as_object_mut()
            .context("plugin configuration is not a JSON object")?;
        fields.insert("name".to_string(), Value::String(network.name.clone()));
        fields.insert(
            "cniVersion".to_string(),
            Value::String(network.cni_version.clone()),
        );
        if let Some(prev) = prev_result {
            fields.insert("prevResult".to_string(), prev.clone());
        }
        Ok(config)
    }

    async fn exec_plugin(
        &self,
        command: &str,
        config: &Value,
        invocation: &ChainInvocation,
    ) -> Result<Vec<u8>> {
        let plugin_type = config["type"]
            .as_str()
            .context("plugin configuration has no 'type'")?
            .to_string();
        // Resolved after the chroot, so the path is relative to the
        // execution root.
        let program = self.cni_bin_path.join(&plugin_type);

        debug!(
            plugin = %plugin_type,
            command,
            container_id = %invocation.container_id,
            "invoking CNI plugin"
        );

        let mut cmd = Command::new(&program);
        cmd.env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", &invocation.container_id)
            .env("CNI_NETNS", &invocation.netns_path)
            .env("CNI_IFNAME", &invocation.interface_name)
            .env("CNI_ARGS", invocation.cni_args())
            .env("CNI_PATH", &self.cni_bin_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.exec_root != PathBuf::from("/") {
            let exec_root = self.exec_root.clone();
            // Safety: chroot and chdir are async-signal-safe.
            unsafe {
                cmd.pre_exec(move || {
                    nix::unistd::chroot(&exec_root)
                        .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
                    nix::unistd::chdir("/")
                        .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
                    Ok(())
                });
            }
        }

        let stdin_data = serde_json::to_vec(config).context("failed to serialize plugin config")?;

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn CNI plugin '{plugin_type}'"))?;
        let mut stdin = child.stdin.take().context("plugin stdin unavailable")?;
        stdin
            .write_all(&stdin_data)
            .await
            .context("failed to write plugin config to stdin")?;
        drop(stdin);

        let output = match tokio::time::timeout(PLUGIN_TIMEOUT, child.wait_with_output()).await {
            Ok(output) => output.context("failed to collect plugin output")?,
            // The child is killed on drop of the output future.
            Err(_) => bail!(
                "CNI plugin '{plugin_type}' timed out after {}s",
                PLUGIN_TIMEOUT.as_secs()
            ),
        };

        if !output.status.success() {
            if let Ok(cni_error) = serde_json::from_slice::<CniErrorMsg>(&output.stdout) {
                bail!("CNI plugin '{plugin_type}' failed: {cni_error}");
            }
            bail!(
                "CNI plugin '{plugin_type}' exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl ChainRunner for ExecChainRunner {
    async fn add(
        &self,
        invocation: &ChainInvocation,
        network: &NetworkConfigList,
    ) -> Result<Value> {
        let mut prev_result: Option<Value> = None;

        for plugin in &network.plugins {
            let config = Self::plugin_config(network, plugin, prev_result.as_ref())?;
            let stdout = self.exec_plugin("ADD", &config, invocation).await?;
            let result: Value = serde_json::from_slice(&stdout)
                .context("CNI plugin returned unparseable result")?;
            prev_result = Some(result);
        }

        prev_result.with_context(|| {
            format!(
                "network configuration '{}' contains no plugins",
                network.name
            )
        })
    }

    async fn delete(
        &self,
        invocation: &ChainInvocation,
        network: &NetworkConfigList,
        prev_result: Option<&Value>,
    ) -> Result<()> {
        for plugin in network.plugins.iter().rev() {
            let config = Self::plugin_config(network, plugin, prev_result)?;
            self.exec_plugin("DEL", &config, invocation).await?;
        }
        Ok(())
    }
}
