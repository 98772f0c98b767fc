//! 统一错误处理模块
//!
//! - 请求级错误（校验失败、拓扑查询失败、配置错误）在分发前直接返回
//! - 目标级错误（超时、传输失败）不在此处，它们作为数据写入 `TargetResult`

use thiserror::Error;

use crate::selector::SelectorError;

/// 拓扑查询错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// 服务不存在
    #[error("service not found: {0}")]
    NotFound(String),

    /// 控制面不可达或响应无法解析
    #[error("topology unavailable: {0}")]
    Unavailable(String),
}

/// 传输层错误（单个目标）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// 传输层自身报告超时
    #[error("request timed out")]
    Timeout,

    /// 连接失败（可重试）
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// 协议错误：非 2xx 状态码、响应格式错误、控制面拒绝执行
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// 是否值得在超时预算内重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connectivity(_))
    }
}

/// 分发错误：请求级失败，分发不会部分执行
#[derive(Debug, Error)]
pub enum DispatchError {
    /// 请求格式错误
    #[error("Validation error: {0}")]
    Validation(String),

    /// 目标 ID 非法
    #[error(transparent)]
    Selector(#[from] SelectorError),

    /// 服务展开失败，整个请求中止
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
