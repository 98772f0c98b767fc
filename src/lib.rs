//! cluster-run 公共库
//!
//! 在集群的多个目标（机器、服务、单元）上执行同一条 shell 命令，
//! 每个目标独立限时，并把各目标的结果按请求顺序汇总。

pub mod aggregate;
pub mod client;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod selector;
pub mod telemetry;
pub mod topology;
pub mod transport;
pub mod types;

pub use aggregate::Aggregator;
pub use client::{DEFAULT_TIMEOUT, ExecutionClient, ExecutionPolicy};
pub use config::{AppConfig, ConfigManager, EnvironmentConfig, load_config};
pub use controller::{Controller, ControllerFactory, EnvironmentContext};
pub use dispatch::Dispatcher;
pub use error::{DispatchError, Result, TopologyError, TransportError};
pub use selector::{SelectorError, TargetSelector};
pub use topology::{StaticTopology, Topology};
pub use transport::Transport;
pub use types::{
    AggregateResult, CommandRequest, ExitCodePolicy, Outcome, Overall, RunOutput, TargetKind,
    TargetRef, TargetResult,
};
