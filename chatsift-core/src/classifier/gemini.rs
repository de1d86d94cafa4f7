use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::prompt::build_prompt;
use super::response::{correlate, parse_records};
use super::{Classifier, RetryDelay, TokioDelay};
use crate::config::ClassifierConfig;
use crate::credentials::DynCredentialStore;
use crate::error::{retry_async_with, ChatsiftError, ChatsiftResult, RetryConfig};
use crate::models::{Batch, ClassifiedMessage};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(prompt: &'a str) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            safety_settings: vec![SafetySetting {
                category: "HARM_CATEGORY_HARASSMENT",
                threshold: "BLOCK_NONE",
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

impl GenerateContentResponse {
    fn into_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
            .filter(|t| !t.trim().is_empty())
    }
}

/// Maps a non-2xx answer to the error taxonomy. 500 and 503 are the only
/// statuses worth retrying.
fn status_error(status: u16, body: &str) -> ChatsiftError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        500 | 503 => ChatsiftError::ApiServiceUnavailable { status, message },
        _ => ChatsiftError::ApiRejected { status, message },
    }
}

/// Client for the Gemini `generateContent` endpoint: one prompt in, the first
/// candidate's text out. 500, 503 and timeouts are retried.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    request_timeout_secs: u64,
    retry: RetryConfig,
    credentials: DynCredentialStore,
    delay: Arc<dyn RetryDelay>,
}

impl GeminiClient {
    /// Endpoint, timeout and retry settings come from `config`; `model` may
    /// differ from the classification model.
    pub fn new(
        config: &ClassifierConfig,
        model: impl Into<String>,
        credentials: DynCredentialStore,
    ) -> ChatsiftResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ChatsiftError::ApiRequestFailed(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            model: model.into(),
            request_timeout_secs: config.request_timeout_secs,
            retry: config.retry_config(),
            credentials,
            delay: Arc::new(TokioDelay),
        })
    }

    /// Replaces the backoff clock.
    pub fn with_delay(mut self, delay: Arc<dyn RetryDelay>) -> Self {
        self.delay = delay;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Request URL without the key parameter.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    /// The stored key, or [`ChatsiftError::MissingCredential`].
    pub fn credential(&self) -> ChatsiftResult<String> {
        self.credentials.get().ok_or_else(|| {
            ChatsiftError::MissingCredential("no Gemini API key is saved".to_string())
        })
    }

    pub async fn generate(&self, prompt: &str) -> ChatsiftResult<String> {
        let delay = self.delay.as_ref();
        retry_async_with(
            move |attempt| self.attempt(prompt, attempt),
            &self.retry,
            move |wait| delay.wait(wait),
        )
        .await
    }

    async fn attempt(&self, prompt: &str, attempt: u32) -> ChatsiftResult<String> {
        // Read per attempt: the key may be saved or cleared while we back off.
        let key = self.credential()?;

        debug!(attempt = attempt + 1, model = %self.model, "Sending generateContent request");

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", key.as_str())])
            .json(&GenerateContentRequest::new(prompt))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| ChatsiftError::ApiParseError(format!("generateContent body: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(ChatsiftError::ApiRejected {
                status: status.as_u16(),
                message: error.message,
            });
        }

        parsed.into_text().ok_or(ChatsiftError::EmptyResponse)
    }

    fn transport_error(&self, err: reqwest::Error) -> ChatsiftError {
        if err.is_timeout() {
            ChatsiftError::ApiTimeout(self.request_timeout_secs)
        } else {
            err.into()
        }
    }
}

/// Classifier backed by the Gemini `generateContent` endpoint.
pub struct GeminiClassifier {
    client: GeminiClient,
    max_text_chars: usize,
}

impl GeminiClassifier {
    pub fn new(config: ClassifierConfig, credentials: DynCredentialStore) -> ChatsiftResult<Self> {
        let client = GeminiClient::new(&config, config.model.clone(), credentials)?;
        Ok(Self {
            client,
            max_text_chars: config.max_text_chars,
        })
    }

    /// Replaces the backoff clock.
    pub fn with_delay(mut self, delay: Arc<dyn RetryDelay>) -> Self {
        self.client = self.client.with_delay(delay);
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        self.client.retry_config()
    }

    pub fn endpoint(&self) -> String {
        self.client.endpoint()
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    fn name(&self) -> &str {
        self.client.model()
    }

    async fn classify(&self, batch: &Batch) -> ChatsiftResult<Vec<ClassifiedMessage>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_prompt(batch, self.max_text_chars)?;
        let text = self.client.generate(&prompt).await?;

        let records = parse_records(&text)?;
        let classified = correlate(batch, records);

        info!(
            batch = batch.len(),
            kept = classified.len(),
            "Classified batch"
        );
        Ok(classified)
    }
}
