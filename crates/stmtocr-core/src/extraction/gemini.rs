//! Google Generative Language API client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{ExtractionRequest, ExtractionService};
use crate::error::{ServiceError, StmtError};
use crate::models::config::ServiceConfig;

/// Blocking client for the `generateContent` endpoint.
pub struct GeminiClient {
    client: reqwest::blocking::Client,
    url: String,
    api_key: String,
    system_prompt: String,
    timeout_secs: u64,
}

impl GeminiClient {
    /// Build a client from the service configuration.
    ///
    /// Fails when no API key was resolved.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, StmtError> {
        let api_key = config.api_key()?.to_string();

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StmtError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!(
                "{}/models/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
            api_key,
            system_prompt: config.system_prompt.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn body<'a>(&'a self, payload: &'a str, request: &ExtractionRequest) -> GenerateRequest<'a> {
        GenerateRequest {
            system_instruction: (!self.system_prompt.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part {
                    text: &self.system_prompt,
                }],
            }),
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: payload }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            ServiceError::Transport(format!("cannot connect to {}: {}", self.url, e))
        } else {
            ServiceError::Transport(e.to_string())
        }
    }
}

impl ExtractionService for GeminiClient {
    fn generate(&self, request: &ExtractionRequest) -> Result<String, ServiceError> {
        let payload = request.payload();
        debug!("Sending {} characters to {}", payload.len(), self.url);

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.body(&payload, request))
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(match status {
                401 | 403 => ServiceError::Auth(body),
                429 => ServiceError::Quota(body),
                _ => ServiceError::Status { status, body },
            });
        }

        let envelope: GenerateResponse = response
            .json()
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        envelope.text()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    /// Text of the first candidate, parts concatenated.
    fn text(self) -> Result<String, ServiceError> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::InvalidResponse("response has no candidates".to_string()))?;

        if let Some(reason) = &candidate.finish_reason {
            trace!("Candidate finished with {}", reason);
        }

        let content = candidate.content.ok_or_else(|| {
            ServiceError::InvalidResponse(format!(
                "candidate has no content (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ))
        })?;

        Ok(content.parts.into_iter().map(|p| p.text).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    fn config(endpoint: &str) -> ServiceConfig {
        ServiceConfig {
            endpoint: endpoint.to_string(),
            api_key: Some("test-key".to_string()),
            timeout_secs: 5,
            ..ServiceConfig::default()
        }
    }

    fn request() -> ExtractionRequest {
        ExtractionRequest {
            instructions: "Extract".to_string(),
            text: "RELEVE DE COMPTE".to_string(),
            temperature: 0.0,
            max_output_tokens: 5000,
        }
    }

    /// Serve one HTTP response and hand back the raw request.
    fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/v1beta", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });

        (endpoint, handle)
    }

    #[test]
    fn test_requires_api_key() {
        let config = ServiceConfig::default();
        assert!(matches!(GeminiClient::from_config(&config), Err(StmtError::Config(_))));
    }

    #[test]
    fn test_request_body_shape() {
        let client = GeminiClient::from_config(&config("http://localhost/v1beta/")).unwrap();
        assert_eq!(
            client.url,
            "http://localhost/v1beta/models/gemini-1.5-flash:generateContent"
        );

        let request = request();
        let payload = request.payload();
        let body = serde_json::to_value(client.body(&payload, &request)).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Extract\nRELEVE DE COMPTE\n");
        assert_eq!(body["generationConfig"]["temperature"], 0.0);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 5000);
        assert!(body["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("bank statements"));
    }

    #[test]
    fn test_generate_concatenates_parts() {
        let (endpoint, server) = serve_once(
            "200 OK",
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"bank\":"},{"text":"\"X\"}"}]},"finishReason":"STOP"}]}"#,
        );
        let client = GeminiClient::from_config(&config(&endpoint)).unwrap();

        let text = client.generate(&request()).unwrap();
        assert_eq!(text, "{\"bank\":\"X\"}");

        let raw = server.join().unwrap();
        assert!(raw.starts_with("POST /v1beta/models/gemini-1.5-flash:generateContent"));
        assert!(raw.to_lowercase().contains("x-goog-api-key: test-key"));
    }

    #[test]
    fn test_status_mapping() {
        let (endpoint, server) = serve_once("429 Too Many Requests", r#"{"error":"quota"}"#);
        let client = GeminiClient::from_config(&config(&endpoint)).unwrap();
        assert!(matches!(client.generate(&request()), Err(ServiceError::Quota(_))));
        server.join().unwrap();

        let (endpoint, server) = serve_once("403 Forbidden", r#"{"error":"key"}"#);
        let client = GeminiClient::from_config(&config(&endpoint)).unwrap();
        assert!(matches!(client.generate(&request()), Err(ServiceError::Auth(_))));
        server.join().unwrap();

        let (endpoint, server) = serve_once("500 Internal Server Error", "oops");
        let client = GeminiClient::from_config(&config(&endpoint)).unwrap();
        assert!(matches!(
            client.generate(&request()),
            Err(ServiceError::Status { status: 500, .. })
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_empty_candidates_are_invalid() {
        let (endpoint, server) = serve_once("200 OK", r#"{"candidates":[]}"#);
        let client = GeminiClient::from_config(&config(&endpoint)).unwrap();
        assert!(matches!(
            client.generate(&request()),
            Err(ServiceError::InvalidResponse(_))
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_connection_refused_is_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = GeminiClient::from_config(&config(&endpoint)).unwrap();
        assert!(matches!(
            client.generate(&request()),
            Err(ServiceError::Transport(_))
        ));
    }

    #[test]
    fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/v1beta", listener.local_addr().unwrap());
        // Accepts and reads, never answers.
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            std::thread::sleep(Duration::from_secs(4));
        });

        let client = GeminiClient::from_config(&ServiceConfig {
            timeout_secs: 1,
            ..config(&endpoint)
        })
        .unwrap();

        let start = std::time::Instant::now();
        let result = client.generate(&request());
        assert!(start.elapsed() < Duration::from_secs(4));

        let error = result.unwrap_err();
        assert!(matches!(error, ServiceError::Timeout(1)));
        let failure = crate::error::PipelineError::from(error);
        assert_eq!(failure.kind(), crate::error::FailureKind::RemoteService);
        assert!(failure.is_retryable());

        server.join().unwrap();
    }
}
