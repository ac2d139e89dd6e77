// medrec/src/analysis/client.rs
//!
//! Analysis client: asks an OpenAI-compatible chat completions endpoint a list
//! of questions about one document.
//!
//! Architecture:
//! - AnalysisService trait: the seam the pipeline depends on (mocked in tests)
//! - OpenAiClient: blocking `ureq` implementation with timeout, bounded retries
//!   and a fixed delay between questions
//!
//! Per-question failures are not errors. A non-2xx status or an unreadable body
//! is recorded as an error string under the question key, exactly where the
//! answer would have gone; callers detect it when the answer fails to parse.

use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use serde_json::{json, Value};

use crate::config::ModelSettings;

/// Answers keyed by the question that produced them.
pub type Answers = BTreeMap<String, String>;

const BACKOFF_BASE_MS: u64 = 1000;

/// Delay before retry `attempt` (0-based); saturates instead of overflowing.
fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(2u64.saturating_pow(attempt)))
}

/// One analysis call: either extracted text, a raw file, or both.
#[derive(Debug, Clone)]
pub struct AnalysisRequest<'a> {
    pub text: Option<&'a str>,
    pub attachment: Option<&'a Path>,
    pub questions: &'a [String],
    pub settings: &'a ModelSettings,
}

impl<'a> AnalysisRequest<'a> {
    pub fn for_text(text: &'a str, questions: &'a [String], settings: &'a ModelSettings) -> Self {
        Self {
            text: Some(text),
            attachment: None,
            questions,
            settings,
        }
    }

    pub fn for_file(file: &'a Path, questions: &'a [String], settings: &'a ModelSettings) -> Self {
        Self {
            text: None,
            attachment: Some(file),
            questions,
            settings,
        }
    }

    pub fn prompt(&self, question: &str) -> String {
        format!(
            "{}\n{}\n\n###\n\n{}\nAnswer:",
            self.settings.role_prompt,
            self.text.unwrap_or_default(),
            question
        )
    }
}

/// Structured-analysis collaborator.
pub trait AnalysisService {
    /// Ask every question in `request`. `Err` means the request could not be
    /// built at all (e.g. unreadable attachment).
    fn ask(&self, request: &AnalysisRequest<'_>) -> Result<Answers>;
}

pub struct OpenAiClient {
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    fn endpoint(settings: &ModelSettings) -> String {
        format!("{}/chat/completions", settings.api_base.trim_end_matches('/'))
    }

    /// Send one payload, retrying transport errors, 429 and 5xx.
    fn send_with_retries(&self, settings: &ModelSettings, payload: &Value) -> String {
        let agent = ureq::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build();
        let url = Self::endpoint(settings);
        let use_function = settings.function_schema.is_some();

        let mut attempt = 0;
        loop {
            tracing::info!(model = %settings.model_name, attempt, "Sending request to analysis API");
            let result = agent
                .post(&url)
                .set("Authorization", &format!("Bearer {}", self.api_key))
                .set("Content-Type", "application/json")
                .send_json(payload);

            let retryable = match &result {
                Err(ureq::Error::Status(code, _)) => *code == 429 || *code >= 500,
                Err(ureq::Error::Transport(_)) => true,
                Ok(_) => false,
            };
            if retryable && attempt < settings.max_retries {
                let delay = backoff(attempt);
                tracing::warn!(attempt, backoff_ms = delay.as_millis() as u64, "Retrying analysis request");
                thread::sleep(delay);
                attempt += 1;
                continue;
            }

            return match result {
                Ok(response) => match response.into_json::<Value>() {
                    Ok(body) => match extract_answer(&body, use_function) {
                        Ok(answer) => {
                            tracing::info!("Received successful response from analysis API");
                            answer
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Analysis API response had no answer");
                            format!("API response could not be read: {}", e)
                        }
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to parse analysis API response");
                        format!("API response could not be read: {}", e)
                    }
                },
                Err(ureq::Error::Status(code, response)) => {
                    let body = response.into_string().unwrap_or_default();
                    tracing::error!(code, body = %body, "Analysis API request failed");
                    format!("API request failed with status code {}: {}", code, body)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Request to analysis API failed");
                    format!("API request failed with error: {}", e)
                }
            };
        }
    }
}

impl AnalysisService for OpenAiClient {
    fn ask(&self, request: &AnalysisRequest<'_>) -> Result<Answers> {
        let attachment = request
            .attachment
            .map(encode_attachment)
            .transpose()?;

        let mut answers = Answers::new();
        for question in request.questions {
            tracing::info!(question = %question, "Preparing to submit question");
            let payload = build_payload(request, question, attachment.as_ref());
            let answer = self.send_with_retries(request.settings, &payload);
            answers.insert(question.clone(), answer);

            thread::sleep(Duration::from_millis(request.settings.request_delay_ms));
        }

        tracing::info!(count = answers.len(), "Completed processing all questions");
        Ok(answers)
    }
}

/// Content part carrying a raw file, ready to splice into a user message.
fn encode_attachment(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read attachment: {}", path.display()))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let part = match extension.as_str() {
        "png" | "jpg" | "jpeg" | "tif" | "tiff" => {
            let mime = match extension.as_str() {
                "png" => "image/png",
                "tif" | "tiff" => "image/tiff",
                _ => "image/jpeg",
            };
            json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{};base64,{}", mime, encoded)}
            })
        }
        _ => json!({
            "type": "file",
            "file": {
                "filename": filename,
                "file_data": format!("data:application/pdf;base64,{}", encoded)
            }
        }),
    };
    Ok(part)
}

pub(crate) fn build_payload(
    request: &AnalysisRequest<'_>,
    question: &str,
    attachment: Option<&Value>,
) -> Value {
    let prompt = request.prompt(question);
    let content = match attachment {
        Some(part) => json!([{"type": "text", "text": prompt}, part]),
        None => Value::String(prompt),
    };

    let mut payload = json!({
        "model": request.settings.model_name,
        "messages": [{"role": "user", "content": content}],
        "max_tokens": request.settings.max_tokens,
        "temperature": request.settings.temperature,
    });
    if let Some(schema) = &request.settings.function_schema {
        payload["functions"] = json!([schema]);
    }
    payload
}

pub(crate) fn extract_answer(body: &Value, use_function: bool) -> Result<String> {
    let message = &body["choices"][0]["message"];
    let answer = if use_function {
        message["function_call"]["arguments"].as_str()
    } else {
        message["content"].as_str()
    };
    answer
        .map(str::to_string)
        .ok_or_else(|| anyhow!("No answer in analysis API response"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> ModelSettings {
        ModelSettings {
            role_prompt: "You are a medical records assistant.".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_prompt_layout() {
        let settings = settings();
        let questions = vec!["What?".to_string()];
        let request = AnalysisRequest::for_text("Visit text", &questions, &settings);
        assert_eq!(
            request.prompt("What?"),
            "You are a medical records assistant.\nVisit text\n\n###\n\nWhat?\nAnswer:"
        );
    }

    #[test]
    fn test_payload_without_schema() {
        let settings = settings();
        let questions = vec!["What?".to_string()];
        let request = AnalysisRequest::for_text("Visit text", &questions, &settings);
        let payload = build_payload(&request, "What?", None);

        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["max_tokens"], 2000);
        assert!(payload["messages"][0]["content"].is_string());
        assert!(payload.get("functions").is_none());
    }

    #[test]
    fn test_payload_with_schema_and_attachment() {
        let temp_dir = TempDir::new().unwrap();
        let pdf = temp_dir.path().join("scan.pdf");
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();

        let mut settings = settings();
        settings.function_schema = Some(json!({"name": "medical_record", "parameters": {}}));
        let questions = vec!["What?".to_string()];
        let request = AnalysisRequest::for_file(&pdf, &questions, &settings);

        let attachment = encode_attachment(&pdf).unwrap();
        let payload = build_payload(&request, "What?", Some(&attachment));

        assert_eq!(payload["functions"][0]["name"], "medical_record");
        let content = &payload["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["file"]["filename"], "scan.pdf");
        assert!(content[1]["file"]["file_data"]
            .as_str()
            .unwrap()
            .starts_with("data:application/pdf;base64,"));
    }

    #[test]
    fn test_image_attachment_uses_image_url() {
        let temp_dir = TempDir::new().unwrap();
        let png = temp_dir.path().join("xray.PNG");
        std::fs::write(&png, [0x89, b'P', b'N', b'G']).unwrap();

        let part = encode_attachment(&png).unwrap();
        assert_eq!(part["type"], "image_url");
        assert!(part["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_missing_attachment_is_an_error() {
        assert!(encode_attachment(Path::new("/no/such/file.pdf")).is_err());
    }

    #[test]
    fn test_extract_answer() {
        let content = json!({"choices": [{"message": {"content": "{\"visit_type\": \"Lab\"}"}}]});
        assert_eq!(
            extract_answer(&content, false).unwrap(),
            "{\"visit_type\": \"Lab\"}"
        );

        let function = json!({"choices": [{"message": {
            "content": null,
            "function_call": {"name": "medical_record", "arguments": "{}"}
        }}]});
        assert_eq!(extract_answer(&function, true).unwrap(), "{}");
        assert!(extract_answer(&function, false).is_err());
        assert!(extract_answer(&json!({"error": "x"}), false).is_err());
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff(0), Duration::from_millis(1000));
        assert_eq!(backoff(1), Duration::from_millis(2000));
        assert_eq!(backoff(3), Duration::from_millis(8000));
        assert_eq!(backoff(55), Duration::from_millis(u64::MAX));
        assert_eq!(backoff(u32::MAX), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let mut settings = settings();
        settings.api_base = "http://localhost:8080/v1/".to_string();
        assert_eq!(
            OpenAiClient::endpoint(&settings),
            "http://localhost:8080/v1/chat/completions"
        );
    }
}
