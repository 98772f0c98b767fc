//! 控制面传输抽象：向单个具体目标发送一次执行请求

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{RunOutput, TargetRef};

/// 远程执行传输
///
/// 实现只负责一次往返；超时兜底、重试和结果归类由 `ExecutionClient` 完成。
/// 传入的 `timeout` 供实现设置自身的请求超时，调用方在超时后会直接丢弃返回的 future。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_run_request(
        &self,
        target: &TargetRef,
        command: &str,
        timeout: Duration,
    ) -> Result<RunOutput, TransportError>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn send_run_request(
        &self,
        target: &TargetRef,
        command: &str,
        timeout: Duration,
    ) -> Result<RunOutput, TransportError> {
        (**self).send_run_request(target, command, timeout).await
    }
}
