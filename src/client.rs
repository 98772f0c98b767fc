//! # 执行客户端
//!
//! 对单个具体目标发起一次执行请求，并把传输层的各种结局归类为 `TargetResult`：
//! - 超时内返回 → `Success`（非零退出码同样是 `Success`）
//! - 超时 → `Timeout`，底层请求 future 被直接丢弃
//! - 连接 / 协议错误 → `TransportFailure`
//!
//! 重试只针对连接失败，并且全部发生在同一个超时预算内。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::Transport;
use crate::types::{RunOutput, TargetRef, TargetResult};

/// 默认单目标超时（5 分钟）
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// 执行策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// 请求未指定超时时使用
    pub default_timeout: Duration,
    /// 连接失败后的额外尝试次数
    pub max_retries: u32,
    /// 两次尝试之间的等待
    pub retry_backoff: Duration,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            max_retries: 0,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl ExecutionPolicy {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

#[derive(Clone)]
pub struct ExecutionClient {
    transport: Arc<dyn Transport>,
    policy: ExecutionPolicy,
}

impl ExecutionClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            policy: ExecutionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// 零值超时替换为默认超时
    pub fn effective_timeout(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            self.policy.default_timeout
        } else {
            requested
        }
    }

    /// 在 `target` 上执行 `command`，最多阻塞 `timeout`（零值取默认超时）
    pub async fn execute(&self, target: TargetRef, command: &str, timeout: Duration) -> TargetResult {
        if !target.is_concrete() {
            warn!(target_ref = %target, "refusing to execute on a group target");
            return TargetResult::transport_failure(
                target,
                "group targets must be expanded before execution",
            );
        }

        let timeout = self.effective_timeout(timeout);
        let started = Instant::now();
        let fut = self.send_with_retry(&target, command, timeout);

        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(output)) => {
                debug!(
                    target_ref = %target,
                    exit_code = output.exit_code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "command completed"
                );
                TargetResult::new(target, output.into())
            }
            Ok(Err(TransportError::Timeout)) => {
                warn!(target_ref = %target, timeout_ms = timeout.as_millis() as u64, "transport reported timeout");
                TargetResult::timeout(target)
            }
            Ok(Err(err)) => {
                warn!(target_ref = %target, error = %err, "transport failure");
                TargetResult::transport_failure(target, err.to_string())
            }
            Err(_) => {
                warn!(target_ref = %target, timeout_ms = timeout.as_millis() as u64, "command timed out");
                TargetResult::timeout(target)
            }
        }
    }

    async fn send_with_retry(
        &self,
        target: &TargetRef,
        command: &str,
        timeout: Duration,
    ) -> Result<RunOutput, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.send_run_request(target, command, remaining).await {
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    warn!(
                        target_ref = %target,
                        attempt,
                        max_retries = self.policy.max_retries,
                        error = %err,
                        "retrying after transport failure"
                    );
                    tokio::time::sleep(self.policy.retry_backoff).await;
                }
                result => return result,
            }
        }
    }
}
