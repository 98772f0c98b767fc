use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{TopologyError, TransportError};
use crate::topology::Topology;
use crate::transport::Transport;
use crate::types::{RunOutput, TargetRef};

use super::EnvironmentContext;

/// HTTP 控制面客户端，同时提供执行传输与拓扑查询
///
/// - `POST {endpoint}/run`：在单个目标上执行命令
/// - `GET {endpoint}/services/{name}/units`：查询服务的单元列表
#[derive(Clone)]
pub struct HttpController {
    client: Client,
    endpoint: String,
    environment: String,
    token: Option<String>,
    headers: HashMap<String, String>,
    topology_timeout: Duration,
}

/// 服务展开查询的默认超时
pub const DEFAULT_TOPOLOGY_TIMEOUT: Duration = Duration::from_secs(30);

impl HttpController {
    pub fn new(
        client: Client,
        context: &EnvironmentContext,
        endpoint: &str,
        token: Option<String>,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            environment: context.name().to_string(),
            token,
            headers,
            topology_timeout: DEFAULT_TOPOLOGY_TIMEOUT,
        }
    }

    pub fn with_topology_timeout(mut self, timeout: Duration) -> Self {
        self.topology_timeout = timeout;
        self
    }

    fn run_url(&self) -> String {
        format!("{}/run", self.endpoint)
    }

    fn units_url(&self, service: &str) -> String {
        format!("{}/services/{}/units", self.endpoint, service)
    }

    fn decorate(&self, request_builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = request_builder
            .header("x-request-id", Uuid::new_v4().to_string())
            .header("x-cluster-environment", &self.environment);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        builder
    }

    fn topology_error(&self, service: &str, err: reqwest::Error) -> TopologyError {
        if err.is_timeout() {
            TopologyError::Unavailable(format!(
                "controller did not answer unit lookup for {service} within {}ms",
                self.topology_timeout.as_millis()
            ))
        } else {
            TopologyError::Unavailable(err.to_string())
        }
    }
}

#[derive(Serialize)]
struct RunRequestPayload<'a> {
    target: &'a TargetRef,
    command: &'a str,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RunResponsePayload {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    error: Option<String>,
}

impl RunResponsePayload {
    fn into_output(self) -> Result<RunOutput, TransportError> {
        if let Some(error) = self.error.filter(|e| !e.is_empty()) {
            return Err(TransportError::Protocol(error));
        }
        let Some(exit_code) = self.code else {
            return Err(TransportError::Protocol(
                "controller response carries no exit code".to_string(),
            ));
        };
        Ok(RunOutput {
            exit_code,
            stdout: decode_stream("stdout", &self.stdout)?,
            stderr: decode_stream("stderr", &self.stderr)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UnitsResponsePayload {
    #[serde(default)]
    units: Vec<String>,
}

fn decode_stream(name: &str, encoded: &str) -> Result<Vec<u8>, TransportError> {
    STANDARD.decode(encoded).map_err(|err| {
        TransportError::Protocol(format!("invalid {name} encoding from controller: {err}"))
    })
}

fn map_request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() {
        TransportError::Connectivity(err.to_string())
    } else {
        TransportError::Protocol(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> TransportError {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TransportError::Timeout,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            TransportError::Connectivity(format!("controller returned {status}"))
        }
        _ if body.is_empty() => TransportError::Protocol(format!("controller returned {status}")),
        _ => TransportError::Protocol(format!("controller returned {status}: {body}")),
    }
}

#[async_trait]
impl Transport for HttpController {
    async fn send_run_request(
        &self,
        target: &TargetRef,
        command: &str,
        timeout: Duration,
    ) -> Result<RunOutput, TransportError> {
        let payload = RunRequestPayload {
            target,
            command,
            timeout_ms: timeout.as_millis() as u64,
        };

        let response = self
            .decorate(self.client.post(self.run_url()))
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body.trim()));
        }

        let body: RunResponsePayload = response.json().await.map_err(map_request_error)?;
        debug!(target_ref = %target, code = ?body.code, "controller run response");
        body.into_output()
    }
}

#[async_trait]
impl Topology for HttpController {
    async fn resolve_service(&self, name: &str) -> Result<Vec<String>, TopologyError> {
        let response = self
            .decorate(self.client.get(self.units_url(name)))
            .timeout(self.topology_timeout)
            .send()
            .await
            .map_err(|err| self.topology_error(name, err))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(TopologyError::NotFound(name.to_string())),
            status if !status.is_success() => Err(TopologyError::Unavailable(format!(
                "controller returned {status} for service {name}"
            ))),
            _ => {
                let body: UnitsResponsePayload = response
                    .json()
                    .await
                    .map_err(|err| self.topology_error(name, err))?;
                Ok(body.units)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(endpoint: &str) -> HttpController {
        HttpController::new(
            Client::new(),
            &EnvironmentContext::new("prod"),
            endpoint,
            None,
            HashMap::new(),
        )
    }

    #[test]
    fn urls_ignore_trailing_slash() {
        let c = controller("http://127.0.0.1:17070/api/");
        assert_eq!(c.run_url(), "http://127.0.0.1:17070/api/run");
        assert_eq!(
            c.units_url("wordpress"),
            "http://127.0.0.1:17070/api/services/wordpress/units"
        );
    }

    #[test]
    fn run_payload_carries_tagged_target() {
        let target = TargetRef::unit("mysql/0");
        let payload = RunRequestPayload {
            target: &target,
            command: "uptime",
            timeout_ms: 1500,
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "target": { "kind": "unit", "id": "mysql/0" },
                "command": "uptime",
                "timeout_ms": 1500
            })
        );
    }

    #[test]
    fn response_streams_are_base64_decoded() {
        let payload: RunResponsePayload = serde_json::from_value(serde_json::json!({
            "code": 1,
            "stdout": STANDARD.encode("hello\n"),
            "stderr": STANDARD.encode([0xffu8, 0x00]),
        }))
        .unwrap();

        let output = payload.into_output().unwrap();
        assert_eq!(output.exit_code, 1);
        assert_eq!(output.stdout, b"hello\n");
        assert_eq!(output.stderr, vec![0xffu8, 0x00]);
    }

    #[test]
    fn response_error_field_is_protocol_failure() {
        let payload: RunResponsePayload = serde_json::from_value(serde_json::json!({
            "error": "machine 9 not provisioned"
        }))
        .unwrap();

        assert_eq!(
            payload.into_output().unwrap_err(),
            TransportError::Protocol("machine 9 not provisioned".to_string())
        );
    }

    #[test]
    fn bad_encoding_is_protocol_failure() {
        let payload: RunResponsePayload =
            serde_json::from_value(serde_json::json!({ "code": 0, "stdout": "not base64!" }))
                .unwrap();
        assert!(matches!(
            payload.into_output(),
            Err(TransportError::Protocol(msg)) if msg.contains("stdout")
        ));
    }

    #[test]
    fn missing_exit_code_is_protocol_failure() {
        let payload: RunResponsePayload = serde_json::from_value(serde_json::json!({
            "stdout": STANDARD.encode("looks fine\n"),
        }))
        .unwrap();

        assert_eq!(
            payload.into_output().unwrap_err(),
            TransportError::Protocol("controller response carries no exit code".to_string())
        );
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, ""),
            TransportError::Timeout
        );
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, "bad token"),
            TransportError::Protocol("controller returned 403 Forbidden: bad token".to_string())
        );
    }
}
