use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::Transport;
use crate::types::{RunOutput, TargetRef};

/// 目标 ID 环境变量
pub const TARGET_ENV: &str = "CLUSTER_RUN_TARGET";
/// 目标类型环境变量
pub const TARGET_KIND_ENV: &str = "CLUSTER_RUN_TARGET_KIND";

/// 本机 shell 传输：每个目标都在本机执行 `<shell> -c <command>`
///
/// 目标信息通过环境变量传给命令；调用被放弃时子进程随 future 一起被杀掉。
#[derive(Debug, Clone)]
pub struct LocalShellTransport {
    shell: String,
}

impl LocalShellTransport {
    pub fn new<T: Into<String>>(shell: T) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for LocalShellTransport {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl Transport for LocalShellTransport {
    async fn send_run_request(
        &self,
        target: &TargetRef,
        command: &str,
        timeout: Duration,
    ) -> Result<RunOutput, TransportError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .env(TARGET_ENV, target.id())
            .env(TARGET_KIND_ENV, target.kind().as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result.map_err(|err| {
                TransportError::Connectivity(format!("failed to spawn {}: {err}", self.shell))
            })?,
            Err(_) => return Err(TransportError::Timeout),
        };

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(target_ref = %target, exit_code, "local command exited");
        Ok(RunOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
