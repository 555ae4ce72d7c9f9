// Submits a computation graph to ComfyUI's /prompt endpoint.
//
// This is fire-and-forget: one POST, and the prompt_id that comes back is the
// whole result. Nothing polls the history or watches the websocket, and nothing
// is retried. Errors are typed so the caller can tell "server down" from "server
// said no".

use std::time::Duration;

use log::{debug, info, trace};
use reqwest::Url;
use serde::Serialize;

use crate::{
    config::BackendConfig,
    graph::{ComputationGraph, GraphError},
};

/// What ComfyUI hands back for a queued prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("refusing to submit graph: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not reach {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String, body: String },
}

impl SubmissionError {
    /// A one-line suggestion for the user.
    pub fn remediation(&self) -> String {
        match self {
            SubmissionError::InvalidEndpoint { .. } => {
                "Set backend.endpoint (or $COMFYUI_URL) to an http:// URL like http://127.0.0.1:8188".to_string()
            }
            SubmissionError::InvalidGraph(_) => {
                "Fix the workflow, or set backend.validate_graph = false to let the server judge it".to_string()
            }
            SubmissionError::Serialize(_) => "Check the workflow for values JSON can't hold".to_string(),
            SubmissionError::Connection { endpoint, .. } => {
                format!("Make sure ComfyUI is running and listening at {}", endpoint)
            }
            SubmissionError::HttpStatus { status, .. } if (400..500).contains(status) => {
                "The server rejected the workflow; check node inputs and that the model files exist".to_string()
            }
            SubmissionError::HttpStatus { .. } => "Check the ComfyUI server log".to_string(),
            SubmissionError::MalformedResponse { .. } => {
                "Is the endpoint really a ComfyUI server?".to_string()
            }
        }
    }
}

// Implementation-only
#[derive(Debug, Serialize)]
struct PromptRequest<'a> {
    prompt: &'a ComputationGraph,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
}

#[derive(Clone, Debug)]
pub struct JobSubmitter {
    client: reqwest::Client,
    endpoint: Url,
    client_id: Option<String>,
    validate_graph: bool,
}

impl JobSubmitter {
    pub fn new(config: &BackendConfig) -> Result<Self, SubmissionError> {
        let endpoint = parse_endpoint(&config.endpoint)?;
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|source| SubmissionError::Connection {
            endpoint: endpoint.to_string(),
            source,
        })?;
        Ok(Self {
            client,
            endpoint,
            client_id: config.client_id.clone(),
            validate_graph: config.validate_graph,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The JSON body that submit() would POST.
    pub fn request_body(&self, graph: &ComputationGraph) -> Result<serde_json::Value, SubmissionError> {
        let body = serde_json::to_value(PromptRequest {
            prompt: graph,
            client_id: self.client_id.as_deref(),
        })?;
        Ok(body)
    }

    /// Queues the graph. Returns as soon as ComfyUI has accepted (or refused) it.
    pub async fn submit(&self, graph: &ComputationGraph) -> Result<JobHandle, SubmissionError> {
        if self.validate_graph {
            graph.validate()?;
        }
        let url = self.prompt_url();
        let body = self.request_body(graph)?;
        debug!("Submitting {} nodes to {}", graph.len(), url);
        trace!("Request: {}", body);

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|source| SubmissionError::Connection {
                endpoint: self.endpoint.to_string(),
                source,
            })?;
        let status = response.status();
        let text = response.text().await.map_err(|source| SubmissionError::Connection {
            endpoint: self.endpoint.to_string(),
            source,
        })?;
        trace!("Response ({}): {}", status, text);
        if !status.is_success() {
            return Err(SubmissionError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        let handle = parse_prompt_id(&text)?;
        info!("Queued prompt {}", handle.id);
        Ok(handle)
    }

    fn prompt_url(&self) -> Url {
        // Url::join would drop the last path segment of a base without a
        // trailing slash, so build the path by hand.
        let mut url = self.endpoint.clone();
        let path = format!("{}/prompt", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, SubmissionError> {
    let invalid = |reason: String| SubmissionError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let url = Url::parse(endpoint.trim()).map_err(|e| invalid(e.to_string()))?;
    // The client is built without TLS; ComfyUI listens on plain http.
    match url.scheme() {
        "http" => {}
        other => return Err(invalid(format!("unsupported scheme {:?}", other))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn parse_prompt_id(text: &str) -> Result<JobHandle, SubmissionError> {
    let malformed = |reason: &str| SubmissionError::MalformedResponse {
        reason: reason.to_string(),
        body: text.to_string(),
    };
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| malformed(&format!("not JSON ({})", e)))?;
    let object = value.as_object().ok_or_else(|| malformed("not a JSON object"))?;
    // prompt_id is opaque; numbers are accepted and kept as their decimal form.
    let id = match object.get("prompt_id") {
        Some(serde_json::Value::String(id)) => id.clone(),
        Some(serde_json::Value::Number(id)) => id.to_string(),
        Some(_) => return Err(malformed("prompt_id is neither a string nor a number")),
        None => return Err(malformed("missing prompt_id")),
    };
    if let Some(number) = object.get("number") {
        debug!("Queue position: {}", number);
    }
    Ok(JobHandle { id })
}
