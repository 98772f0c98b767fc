//! 集群拓扑查询：服务 → 单元

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TopologyError;

/// 拓扑查询
///
/// 返回的单元顺序即为该服务展开后的分发顺序。
#[async_trait]
pub trait Topology: Send + Sync {
    async fn resolve_service(&self, name: &str) -> Result<Vec<String>, TopologyError>;
}

#[async_trait]
impl<T> Topology for Arc<T>
where
    T: Topology + ?Sized,
{
    async fn resolve_service(&self, name: &str) -> Result<Vec<String>, TopologyError> {
        (**self).resolve_service(name).await
    }
}

/// 基于配置的静态拓扑
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    services: HashMap<String, Vec<String>>,
}

impl StaticTopology {
    pub fn new(services: HashMap<String, Vec<String>>) -> Self {
        Self { services }
    }

    pub fn with_service<S, I, U>(mut self, name: S, units: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        self.services
            .insert(name.into(), units.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl Topology for StaticTopology {
    async fn resolve_service(&self, name: &str) -> Result<Vec<String>, TopologyError> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| TopologyError::NotFound(name.to_string()))
    }
}
