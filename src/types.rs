//! 分发请求、目标引用与执行结果的数据模型

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{DispatchError, Result};

/// 目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Machine,
    Service,
    Unit,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Machine => "machine",
            TargetKind::Service => "service",
            TargetKind::Unit => "unit",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 集群内可寻址的目标
///
/// `Service` 是分组引用，分发前必须展开为 `Unit`；`Machine` 与 `Unit` 可直接执行。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetRef {
    Machine(String),
    Service(String),
    Unit(String),
}

impl TargetRef {
    pub fn machine<T: Into<String>>(id: T) -> Self {
        TargetRef::Machine(id.into())
    }

    pub fn service<T: Into<String>>(name: T) -> Self {
        TargetRef::Service(name.into())
    }

    pub fn unit<T: Into<String>>(name: T) -> Self {
        TargetRef::Unit(name.into())
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            TargetRef::Machine(_) => TargetKind::Machine,
            TargetRef::Service(_) => TargetKind::Service,
            TargetRef::Unit(_) => TargetKind::Unit,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            TargetRef::Machine(id) | TargetRef::Service(id) | TargetRef::Unit(id) => id,
        }
    }

    /// 是否可直接执行（非分组引用）
    pub fn is_concrete(&self) -> bool {
        !matches!(self, TargetRef::Service(_))
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// 单次调用的命令请求，构造后不可变
#[derive(Debug, Clone)]
pub struct CommandRequest {
    command: String,
    timeout: Duration,
    targets: Vec<TargetRef>,
}

impl CommandRequest {
    pub fn new<T: Into<String>>(command: T) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::ZERO,
            targets: Vec::new(),
        }
    }

    /// 零值表示使用环境默认超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 追加目标，重复目标被忽略（保留首次出现的位置）
    pub fn with_target(mut self, target: TargetRef) -> Self {
        if !self.targets.contains(&target) {
            self.targets.push(target);
        }
        self
    }

    pub fn with_targets<I>(self, targets: I) -> Self
    where
        I: IntoIterator<Item = TargetRef>,
    {
        targets
            .into_iter()
            .fold(self, |req, target| req.with_target(target))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn targets(&self) -> &[TargetRef] {
        &self.targets
    }

    /// 校验请求形状；空目标列表不是错误，由分发器返回 `NoTargets`
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(DispatchError::Validation("no command specified".to_string()));
        }
        Ok(())
    }
}

/// 传输层返回的原始执行输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// 非零退出码的判定策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCodePolicy {
    /// 仅退出码为 0 视为成功
    #[default]
    RequireZero,
    /// 命令执行完毕即视为成功，不论退出码
    AnyCompleted,
}

/// 单个目标的执行结果，三种之一
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        exit_code: i32,
        #[serde(serialize_with = "lossy_utf8")]
        stdout: Vec<u8>,
        #[serde(serialize_with = "lossy_utf8")]
        stderr: Vec<u8>,
    },
    Timeout,
    TransportFailure {
        message: String,
    },
}

impl Outcome {
    /// 命令在目标上执行完毕（退出码任意）
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Outcome::Success { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    pub fn succeeded(&self, policy: ExitCodePolicy) -> bool {
        match (self, policy) {
            (Outcome::Success { .. }, ExitCodePolicy::AnyCompleted) => true,
            (Outcome::Success { exit_code, .. }, ExitCodePolicy::RequireZero) => *exit_code == 0,
            _ => false,
        }
    }
}

impl From<RunOutput> for Outcome {
    fn from(output: RunOutput) -> Self {
        Outcome::Success {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

fn lossy_utf8<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// 单个具体目标的结果，由执行客户端创建一次，之后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetResult {
    pub target: TargetRef,
    pub outcome: Outcome,
}

impl TargetResult {
    pub fn new(target: TargetRef, outcome: Outcome) -> Self {
        Self { target, outcome }
    }

    pub fn timeout(target: TargetRef) -> Self {
        Self::new(target, Outcome::Timeout)
    }

    pub fn transport_failure<T: Into<String>>(target: TargetRef, message: T) -> Self {
        Self::new(
            target,
            Outcome::TransportFailure {
                message: message.into(),
            },
        )
    }
}

/// 聚合结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Overall {
    AllSucceeded,
    PartialFailure,
    TotalFailure,
    NoTargets,
}

impl Overall {
    /// 调用方无需升级处理（非零退出、告警）
    pub fn is_clean(&self) -> bool {
        matches!(self, Overall::AllSucceeded | Overall::NoTargets)
    }
}

impl fmt::Display for Overall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Overall::AllSucceeded => "all succeeded",
            Overall::PartialFailure => "partial failure",
            Overall::TotalFailure => "total failure",
            Overall::NoTargets => "no targets",
        };
        f.write_str(text)
    }
}

/// 按展开顺序排列的全部结果；`overall` 由结果推导，不可单独设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    results: Vec<TargetResult>,
    overall: Overall,
}

impl AggregateResult {
    pub(crate) fn from_parts(results: Vec<TargetResult>, overall: Overall) -> Self {
        Self { results, overall }
    }

    pub fn no_targets() -> Self {
        Self {
            results: Vec::new(),
            overall: Overall::NoTargets,
        }
    }

    pub fn results(&self) -> &[TargetResult] {
        &self.results
    }

    pub fn overall(&self) -> Overall {
        self.overall
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
