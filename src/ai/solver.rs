use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::AiConfig;

const SYSTEM_PROMPT: &str = "You are a precise math solver.";

/// Upstream error bodies are cut to this many bytes before they are kept or logged.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream returned no answer")]
    EmptyAnswer,
}

/// Forwards an expression to an external model and returns its free-text answer.
#[async_trait]
pub trait MathSolver: Send + Sync {
    async fn solve(&self, expression: &str) -> Result<String, SolverError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiSolver {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiSolver {
    pub fn new(cfg: &AiConfig, api_key: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", cfg.base_url),
            api_key: api_key.to_string(),
            model: cfg.model.clone(),
        })
    }
}

fn user_prompt(expression: &str) -> String {
    format!(
        "Solve the following math expression and show steps briefly: {expression}. \
         Provide the final simplified answer."
    )
}

fn truncate_body(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

#[async_trait]
impl MathSolver for OpenAiSolver {
    async fn solve(&self, expression: &str) -> Result<String, SolverError> {
        let prompt = user_prompt(expression);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };

        let res = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = truncate_body(res.text().await.unwrap_or_default(), MAX_ERROR_BODY);
            return Err(SolverError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = res.json().await?;
        debug!(choices = parsed.choices.len(), "math solver answered");
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or(SolverError::EmptyAnswer)
    }
}
