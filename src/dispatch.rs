//! # 分发协调器
//!
//! 单次分发的流程：
//!
//! 1. **校验**：请求形状错误直接返回，不发出任何网络请求
//! 2. **展开**：服务引用按拓扑顺序展开为单元，插入到服务原来的位置；拓扑只在此处读取一次
//! 3. **去重**：按目标身份去重，保留首次出现的位置
//! 4. **扇出**：每个具体目标一个 tokio 任务，超时按目标独立计算
//! 5. **汇总**：等待全部任务结束后按展开顺序聚合，不存在提前返回

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::aggregate::Aggregator;
use crate::client::ExecutionClient;
use crate::error::Result;
use crate::topology::Topology;
use crate::types::{AggregateResult, CommandRequest, ExitCodePolicy, TargetRef, TargetResult};

pub struct Dispatcher {
    topology: Arc<dyn Topology>,
    client: ExecutionClient,
    aggregator: Aggregator,
    max_concurrency: Option<usize>,
}

impl Dispatcher {
    pub fn new(topology: Arc<dyn Topology>, client: ExecutionClient) -> Self {
        Self {
            topology,
            client,
            aggregator: Aggregator::default(),
            max_concurrency: None,
        }
    }

    pub fn with_exit_code_policy(mut self, policy: ExitCodePolicy) -> Self {
        self.aggregator = Aggregator::new(policy);
        self
    }

    /// 同时在途的目标上限，`None` 表示不限制
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.map(|n| n.max(1));
        self
    }

    /// 在请求的全部目标上执行命令并返回有序的聚合结果
    ///
    /// 目标级的超时与传输失败记录在结果中；只有请求级错误（校验、拓扑）以 `Err` 返回。
    pub async fn dispatch(&self, req: &CommandRequest) -> Result<AggregateResult> {
        req.validate()?;

        let span = info_span!("dispatch", request_id = %Uuid::new_v4());
        self.run(req).instrument(span).await
    }

    async fn run(&self, req: &CommandRequest) -> Result<AggregateResult> {
        let targets = self.expand(req.targets()).await?;
        if targets.is_empty() {
            info!("no concrete targets after expansion");
            return Ok(AggregateResult::no_targets());
        }

        let timeout = self.client.effective_timeout(req.timeout());
        info!(
            command = %req.command(),
            targets = targets.len(),
            timeout_ms = timeout.as_millis() as u64,
            "dispatching command"
        );

        let started = Instant::now();
        let outcomes = self.fan_out(&targets, req.command(), timeout).await;
        let aggregate = self.aggregator.aggregate(&targets, outcomes);

        info!(
            overall = %aggregate.overall(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dispatch finished"
        );
        Ok(aggregate)
    }

    /// 展开服务引用并去重，得到有序的具体目标列表
    pub async fn expand(&self, targets: &[TargetRef]) -> Result<Vec<TargetRef>> {
        let mut expanded = Vec::with_capacity(targets.len());
        let mut seen = HashSet::with_capacity(targets.len());

        for target in targets {
            match target {
                TargetRef::Service(name) => {
                    let units = self.topology.resolve_service(name).await?;
                    debug!(service = %name, units = units.len(), "expanded service");
                    for unit in units {
                        let unit = TargetRef::Unit(unit);
                        if seen.insert(unit.clone()) {
                            expanded.push(unit);
                        }
                    }
                }
                concrete => {
                    if seen.insert(concrete.clone()) {
                        expanded.push(concrete.clone());
                    }
                }
            }
        }

        Ok(expanded)
    }

    async fn fan_out(
        &self,
        targets: &[TargetRef],
        command: &str,
        timeout: Duration,
    ) -> HashMap<TargetRef, TargetResult> {
        let command: Arc<str> = Arc::from(command);
        let semaphore = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

        let handles: Vec<_> = targets
            .iter()
            .cloned()
            .map(|target| {
                let client = self.client.clone();
                let command = Arc::clone(&command);
                let semaphore = semaphore.clone();
                tokio::spawn(
                    async move {
                        // 信号量从不关闭，acquire 不会失败
                        let _permit = match semaphore {
                            Some(semaphore) => semaphore.acquire_owned().await.ok(),
                            None => None,
                        };
                        client.execute(target, &command, timeout).await
                    }
                    .in_current_span(),
                )
            })
            .collect();

        let mut outcomes = HashMap::with_capacity(targets.len());
        for (target, joined) in targets.iter().zip(join_all(handles).await) {
            match joined {
                Ok(result) => {
                    outcomes.insert(result.target.clone(), result);
                }
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => panic!("execution task for {target} did not complete: {err}"),
            }
        }
        outcomes
    }
}
