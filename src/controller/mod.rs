//! # 控制面适配器
//!
//! 根据环境配置构建执行传输与拓扑查询，支持 HTTP 控制面和本机 shell 两种方式。

mod http;
mod local;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::client::ExecutionClient;
use crate::config::{AppConfig, ControllerConfig, EnvironmentConfig};
use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, Result};
use crate::topology::{StaticTopology, Topology};
use crate::transport::Transport;

pub use http::{DEFAULT_TOPOLOGY_TIMEOUT, HttpController};
pub use local::{LocalShellTransport, TARGET_ENV, TARGET_KIND_ENV};

/// 与控制面建立连接的超时
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 当前集群环境的上下文，核心只透传不解释
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentContext {
    name: String,
}

impl EnvironmentContext {
    pub fn new<T: Into<String>>(name: T) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 某个环境下构建好的传输与拓扑
#[derive(Clone)]
pub struct Controller {
    pub context: EnvironmentContext,
    pub transport: Arc<dyn Transport>,
    pub topology: Arc<dyn Topology>,
}

/// 默认的控制面工厂
#[derive(Clone)]
pub struct ControllerFactory {
    http: Client,
}

impl ControllerFactory {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| {
                DispatchError::Config(format!("failed to build http client: {err}"))
            })?;
        Ok(Self { http })
    }

    pub fn build(&self, context: EnvironmentContext, env: &EnvironmentConfig) -> Controller {
        match &env.controller {
            ControllerConfig::Http {
                endpoint,
                token,
                headers,
            } => {
                info!(environment = %context.name(), endpoint = %endpoint, "using http controller");
                let controller = Arc::new(
                    HttpController::new(
                        self.http.clone(),
                        &context,
                        endpoint,
                        token.clone(),
                        headers.clone(),
                    )
                    .with_topology_timeout(env.topology_timeout()),
                );
                Controller {
                    context,
                    transport: controller.clone(),
                    topology: controller,
                }
            }
            ControllerConfig::Local { shell } => {
                info!(environment = %context.name(), shell = %shell, "using local shell controller");
                Controller {
                    context,
                    transport: Arc::new(LocalShellTransport::new(shell.clone())),
                    topology: Arc::new(StaticTopology::new(env.services.clone())),
                }
            }
        }
    }

    /// 为指定环境构建完整的分发器
    pub fn dispatcher(&self, config: &AppConfig, environment: &str) -> Result<Dispatcher> {
        let env = config.environment(environment)?;
        let controller = self.build(EnvironmentContext::new(environment), env);
        let client = ExecutionClient::new(controller.transport).with_policy(env.execution_policy());

        Ok(Dispatcher::new(controller.topology, client)
            .with_exit_code_policy(env.exit_code_policy)
            .with_max_concurrency(env.max_concurrency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommandRequest, Overall, TargetRef};

    #[tokio::test]
    async fn unknown_environment_is_config_error() {
        let factory = ControllerFactory::new().unwrap();
        let err = factory
            .dispatcher(&AppConfig::default(), "prod")
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[tokio::test]
    async fn local_environment_uses_configured_services() {
        let mut config = AppConfig::default();
        let local = config.environments.get_mut("local").unwrap();
        local
            .services
            .insert("web".to_string(), vec!["web/0".to_string(), "web/1".to_string()]);

        let dispatcher = ControllerFactory::new()
            .unwrap()
            .dispatcher(&config, "local")
            .unwrap();
        let req = CommandRequest::new("echo \"$CLUSTER_RUN_TARGET\"")
            .with_target(TargetRef::service("web"));

        let aggregate = dispatcher.dispatch(&req).await.unwrap();

        assert_eq!(aggregate.overall(), Overall::AllSucceeded);
        let targets: Vec<&TargetRef> = aggregate.results().iter().map(|r| &r.target).collect();
        assert_eq!(
            targets,
            vec![&TargetRef::unit("web/0"), &TargetRef::unit("web/1")]
        );
    }
}
