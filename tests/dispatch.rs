//! 分发核心的端到端属性测试（假传输 + 静态拓扑）

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use cluster_run::{
    CommandRequest, DispatchError, Dispatcher, ExecutionClient, ExitCodePolicy, Outcome, Overall,
    RunOutput, StaticTopology, TargetRef, Transport, TransportError,
};

/// 每个目标的预设行为
#[derive(Clone)]
enum Behavior {
    Reply(RunOutput),
    Fail(TransportError),
    Sleep(Duration, RunOutput),
    Hang,
}

/// 按目标脚本化的传输，记录每次调用
#[derive(Default)]
struct FakeTransport {
    behaviors: HashMap<TargetRef, Behavior>,
    calls: Mutex<Vec<TargetRef>>,
}

impl FakeTransport {
    fn on(mut self, target: TargetRef, behavior: Behavior) -> Self {
        self.behaviors.insert(target, behavior);
        self
    }

    fn calls(&self) -> Vec<TargetRef> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_run_request(
        &self,
        target: &TargetRef,
        _command: &str,
        _timeout: Duration,
    ) -> Result<RunOutput, TransportError> {
        self.calls.lock().unwrap().push(target.clone());
        match self.behaviors.get(target).cloned() {
            Some(Behavior::Reply(output)) => Ok(output),
            Some(Behavior::Fail(err)) => Err(err),
            Some(Behavior::Sleep(delay, output)) => {
                tokio::time::sleep(delay).await;
                Ok(output)
            }
            Some(Behavior::Hang) => std::future::pending().await,
            None => Ok(output(0, target.id(), "")),
        }
    }
}

fn output(exit_code: i32, stdout: &str, stderr: &str) -> RunOutput {
    RunOutput {
        exit_code,
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

fn topology() -> StaticTopology {
    StaticTopology::default()
        .with_service("wordpress", ["wordpress/2", "wordpress/0", "wordpress/1"])
        .with_service("mysql", ["mysql/0"])
}

fn dispatcher(transport: Arc<FakeTransport>) -> Dispatcher {
    Dispatcher::new(Arc::new(topology()), ExecutionClient::new(transport))
}

fn targets(aggregate: &cluster_run::AggregateResult) -> Vec<TargetRef> {
    aggregate.results().iter().map(|r| r.target.clone()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn service_expands_to_units_in_topology_order() {
    let transport = Arc::new(FakeTransport::default());
    let req = CommandRequest::new("hostname").with_target(TargetRef::service("wordpress"));

    let aggregate = assert_ok!(dispatcher(transport.clone()).dispatch(&req).await);

    assert_eq!(aggregate.len(), 3);
    assert_eq!(
        targets(&aggregate),
        vec![
            TargetRef::unit("wordpress/2"),
            TargetRef::unit("wordpress/0"),
            TargetRef::unit("wordpress/1"),
        ]
    );
    assert_eq!(aggregate.overall(), Overall::AllSucceeded);
    assert_eq!(transport.calls().len(), 3);
}

#[tokio::test]
async fn duplicate_machine_runs_once() {
    let transport = Arc::new(FakeTransport::default());
    let req = CommandRequest::new("uptime")
        .with_target(TargetRef::machine("0"))
        .with_target(TargetRef::machine("0"));

    let aggregate = assert_ok!(dispatcher(transport.clone()).dispatch(&req).await);

    assert_eq!(targets(&aggregate), vec![TargetRef::machine("0")]);
    assert_eq!(transport.calls(), vec![TargetRef::machine("0")]);
}

#[tokio::test]
async fn mixed_targets_collapse_to_distinct_concrete_targets() {
    let transport = Arc::new(FakeTransport::default());
    let req = CommandRequest::new("uptime").with_targets([
        TargetRef::unit("wordpress/0"),
        TargetRef::machine("3"),
        TargetRef::service("wordpress"),
        TargetRef::service("mysql"),
        TargetRef::unit("mysql/0"),
    ]);

    let aggregate = assert_ok!(dispatcher(transport.clone()).dispatch(&req).await);

    assert_eq!(
        targets(&aggregate),
        vec![
            TargetRef::unit("wordpress/0"),
            TargetRef::machine("3"),
            TargetRef::unit("wordpress/2"),
            TargetRef::unit("wordpress/1"),
            TargetRef::unit("mysql/0"),
        ]
    );
    assert_eq!(transport.calls().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn all_timeouts_is_total_failure() {
    let transport = Arc::new(
        FakeTransport::default()
            .on(TargetRef::machine("0"), Behavior::Hang)
            .on(TargetRef::machine("1"), Behavior::Fail(TransportError::Timeout)),
    );
    let req = CommandRequest::new("sleep 600")
        .with_timeout(Duration::from_millis(50))
        .with_targets([TargetRef::machine("0"), TargetRef::machine("1")]);

    let aggregate = assert_ok!(dispatcher(transport).dispatch(&req).await);

    assert_eq!(aggregate.overall(), Overall::TotalFailure);
    assert!(
        aggregate
            .results()
            .iter()
            .all(|r| r.outcome == Outcome::Timeout)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_transport_failure_is_partial_and_keeps_exact_outputs() {
    let transport = Arc::new(
        FakeTransport::default()
            .on(TargetRef::machine("0"), Behavior::Reply(output(0, "alpha\n", "")))
            .on(
                TargetRef::machine("1"),
                Behavior::Fail(TransportError::Connectivity("connection refused".into())),
            )
            .on(TargetRef::machine("2"), Behavior::Reply(output(0, "gamma\n", "warn\n"))),
    );
    let req = CommandRequest::new("uname").with_targets([
        TargetRef::machine("0"),
        TargetRef::machine("1"),
        TargetRef::machine("2"),
    ]);

    let aggregate = assert_ok!(dispatcher(transport).dispatch(&req).await);

    assert_eq!(aggregate.overall(), Overall::PartialFailure);
    let results = aggregate.results();
    assert_eq!(results[0].outcome, Outcome::from(output(0, "alpha\n", "")));
    assert!(matches!(
        &results[1].outcome,
        Outcome::TransportFailure { message } if message.contains("connection refused")
    ));
    assert_eq!(results[2].outcome, Outcome::from(output(0, "gamma\n", "warn\n")));
}

#[tokio::test]
async fn empty_request_is_no_targets_without_transport_calls() {
    let transport = Arc::new(FakeTransport::default());
    let req = CommandRequest::new("uptime");

    let aggregate = assert_ok!(dispatcher(transport.clone()).dispatch(&req).await);

    assert_eq!(aggregate.overall(), Overall::NoTargets);
    assert!(aggregate.results().is_empty());
    assert!(transport.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_target_is_bounded_and_fast_siblings_are_kept() {
    let transport = Arc::new(
        FakeTransport::default()
            .on(TargetRef::machine("0"), Behavior::Hang)
            .on(
                TargetRef::machine("1"),
                Behavior::Sleep(Duration::from_millis(20), output(0, "fast\n", "")),
            ),
    );
    let timeout = Duration::from_millis(200);
    let req = CommandRequest::new("work")
        .with_timeout(timeout)
        .with_targets([TargetRef::machine("0"), TargetRef::machine("1")]);

    let started = Instant::now();
    let aggregate = assert_ok!(dispatcher(transport).dispatch(&req).await);
    let elapsed = started.elapsed();

    assert!(elapsed < timeout + Duration::from_secs(2), "took {elapsed:?}");
    assert_eq!(aggregate.overall(), Overall::PartialFailure);
    assert_eq!(aggregate.results()[0].outcome, Outcome::Timeout);
    assert_eq!(aggregate.results()[1].outcome, Outcome::from(output(0, "fast\n", "")));
}

#[tokio::test]
async fn nonzero_exit_depends_on_policy() {
    let behavior = Behavior::Reply(output(1, "", "boom\n"));
    let req = CommandRequest::new("false").with_target(TargetRef::machine("0"));

    let strict = Arc::new(FakeTransport::default().on(TargetRef::machine("0"), behavior.clone()));
    let aggregate = assert_ok!(dispatcher(strict).dispatch(&req).await);
    assert_eq!(aggregate.overall(), Overall::TotalFailure);
    assert_eq!(aggregate.results()[0].outcome.exit_code(), Some(1));

    let lenient = Arc::new(FakeTransport::default().on(TargetRef::machine("0"), behavior));
    let aggregate = assert_ok!(
        dispatcher(lenient)
            .with_exit_code_policy(ExitCodePolicy::AnyCompleted)
            .dispatch(&req)
            .await
    );
    assert_eq!(aggregate.overall(), Overall::AllSucceeded);
}

#[tokio::test]
async fn unknown_service_is_request_error() {
    let transport = Arc::new(FakeTransport::default());
    let req = CommandRequest::new("uptime").with_target(TargetRef::service("postgres"));

    let err = assert_err!(dispatcher(transport.clone()).dispatch(&req).await);

    assert!(matches!(err, DispatchError::Topology(_)));
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn connectivity_failures_are_retried_within_budget() {
    let transport = Arc::new(FakeTransport::default().on(
        TargetRef::machine("0"),
        Behavior::Fail(TransportError::Connectivity("reset".into())),
    ));
    let client = ExecutionClient::new(transport.clone()).with_policy(
        cluster_run::ExecutionPolicy::default()
            .with_max_retries(2)
            .with_retry_backoff(Duration::from_millis(10)),
    );
    let d = Dispatcher::new(Arc::new(topology()), client);
    let req = CommandRequest::new("uptime").with_target(TargetRef::machine("0"));

    let aggregate = assert_ok!(d.dispatch(&req).await);

    assert_eq!(transport.calls().len(), 3);
    assert!(matches!(
        aggregate.results()[0].outcome,
        Outcome::TransportFailure { .. }
    ));
}
