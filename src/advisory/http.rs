//! Remote advisor over HTTP
//!
//! POSTs the case, the design in force and the triggering event as JSON and
//! expects a candidate variant draft back. The candidate inherits the
//! original's safety formula unless the draft names a built-in one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{AdvisoryError, AdvisoryProposal, AdvisoryRequest, DesignAdvisor};
use crate::config::defaults::ADVISOR_HTTP_TIMEOUT_SECS;
use crate::types::{DesignVariant, DeviationEvent, VariantDraft};

#[derive(Serialize)]
struct ProposalRequestBody<'a> {
    case_id: &'a str,
    attempt: u32,
    variant: &'a DesignVariant,
    event: &'a DeviationEvent,
}

#[derive(Debug, Deserialize)]
struct ProposalResponseBody {
    candidate: VariantDraft,
    #[serde(default)]
    rationale: String,
}

#[derive(Clone)]
pub struct HttpAdvisor {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAdvisor {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, AdvisoryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(ADVISOR_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| AdvisoryError::Failure(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DesignAdvisor for HttpAdvisor {
    async fn propose(&self, request: &AdvisoryRequest) -> Result<AdvisoryProposal, AdvisoryError> {
        let body = ProposalRequestBody {
            case_id: &request.case_id,
            attempt: request.attempt,
            variant: &request.variant,
            event: &request.event,
        };

        let mut call = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let resp = call
            .send()
            .await
            .map_err(|e| AdvisoryError::Failure(format!("request to {} failed: {e}", self.endpoint)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AdvisoryError::Failure(format!("advisor returned status {status}")));
        }

        let parsed: ProposalResponseBody = resp
            .json()
            .await
            .map_err(|e| AdvisoryError::InvalidProposal(format!("malformed response: {e}")))?;

        let mut draft = parsed.candidate;
        if draft.parent.is_none() {
            draft.parent = Some(request.variant.id().to_string());
        }
        if draft.rationale.is_empty() {
            draft.rationale.clone_from(&parsed.rationale);
        }
        let candidate = draft
            .into_variant(Some(std::sync::Arc::clone(request.variant.formula())))
            .map_err(|e| AdvisoryError::InvalidProposal(e.to_string()))?;

        debug!(case = %request.case_id, candidate = %candidate.id(), %status, "Remote patch received");
        Ok(AdvisoryProposal {
            rationale: if parsed.rationale.is_empty() {
                candidate.rationale().to_string()
            } else {
                parsed.rationale
            },
            candidate,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertLevel, BuiltinFormula, ParameterSpec};
    use chrono::Utc;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn request() -> AdvisoryRequest {
        let variant = DesignVariant::builder(
            "V1",
            Arc::new(BuiltinFormula::CapacityDemand {
                capacity: "capacity".to_string(),
                demand: "demand".to_string(),
            }),
        )
        .parameter(ParameterSpec::normal("capacity", 150.0, 10.0, "kPa"))
        .parameter(ParameterSpec::normal("demand", 100.0, 0.0, "kPa"))
        .build()
        .unwrap();
        AdvisoryRequest {
            case_id: "RC-000002".to_string(),
            variant,
            event: DeviationEvent {
                sensor_id: "S1".to_string(),
                metric: "capacity".to_string(),
                baseline: 150.0,
                observed: 120.0,
                deviation_percent: -20.0,
                level: AlertLevel::Critical,
                sustained: true,
                timestamp: Utc::now(),
                rolling_mean: 120.0,
                consecutive_readings: 3,
                baseline_version: 1,
                variant_id: "V1".to_string(),
            },
            attempt: 1,
        }
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// One-shot HTTP server answering with `status_line` and `body`.
    async fn serve_once(status_line: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            request
        });
        (format!("http://{addr}/propose"), handle)
    }

    #[tokio::test]
    async fn test_candidate_inherits_formula_and_parent() {
        let body = serde_json::json!({
            "candidate": {
                "id": "V1-remote",
                "parameters": [
                    {"name": "capacity", "distribution": {"kind": "normal", "mean": 175.0, "std_dev": 9.0}, "unit": "kPa"},
                    {"name": "demand", "distribution": {"kind": "normal", "mean": 100.0, "std_dev": 0.0}, "unit": "kPa"}
                ],
                "cost_estimate": 1.2
            },
            "rationale": "Deepen footing"
        })
        .to_string();
        let (url, server) = serve_once("HTTP/1.1 200 OK", body).await;

        let advisor = HttpAdvisor::new(&url, Some("secret".to_string())).unwrap();
        let proposal = advisor.propose(&request()).await.unwrap();
        assert_eq!(proposal.candidate.id(), "V1-remote");
        assert_eq!(proposal.candidate.parent(), Some("V1"));
        assert_eq!(proposal.candidate.formula().name(), "capacity_demand");
        assert_eq!(proposal.rationale, "Deepen footing");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /propose"));
        assert!(raw.to_lowercase().contains("authorization: bearer secret"));
        assert!(raw.contains("\"case_id\":\"RC-000002\""));
    }

    #[tokio::test]
    async fn test_server_error_is_failure() {
        let (url, server) = serve_once("HTTP/1.1 503 Service Unavailable", "{}".to_string()).await;
        let advisor = HttpAdvisor::new(&url, None).unwrap();
        let err = advisor.propose(&request()).await.unwrap_err();
        assert!(matches!(err, AdvisoryError::Failure(ref m) if m.contains("503")));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_candidate_is_invalid_proposal() {
        let body = serde_json::json!({
            "candidate": {
                "id": "V1-bad",
                "parameters": [
                    {"name": "capacity", "distribution": {"kind": "normal", "mean": 175.0, "std_dev": 9.0}}
                ]
            }
        })
        .to_string();
        let (url, server) = serve_once("HTTP/1.1 200 OK", body).await;
        let advisor = HttpAdvisor::new(&url, None).unwrap();
        let err = advisor.propose(&request()).await.unwrap_err();
        // formula needs "demand"
        assert!(matches!(err, AdvisoryError::InvalidProposal(_)));
        server.await.unwrap();
    }
}
