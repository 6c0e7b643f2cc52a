use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::GenerationConfig;

/// Anything that can turn a prompt into text.
pub trait TextGenerator {
    fn generate(&self, model: &str, prompt: &str) -> Result<String>;
}

/// Blocking client for the Generative Language `generateContent` endpoint.
pub struct GeminiClient {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("gitme/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Build a client from config; the API key comes from `cfg.api_key_env`.
    pub fn from_config(cfg: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        let Some(api_key) = api_key else {
            bail!("{} not configured", cfg.api_key_env);
        };
        Ok(Self::new(
            cfg.endpoint.clone(),
            api_key,
            Duration::from_secs(cfg.timeout_secs),
        ))
    }

    fn url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint.trim_end_matches('/'), model)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Concatenated text parts of the first candidate.
fn response_text(resp: &GenerateResponse) -> Option<String> {
    let content = resp.candidates.first()?.content.as_ref()?;
    let text: String = content.parts.iter().filter_map(|p| p.text.as_deref()).collect();
    Some(text)
}

impl TextGenerator for GeminiClient {
    fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });

        let resp = match self
            .agent
            .post(&self.url(model))
            .set("x-goog-api-key", &self.api_key)
            .send_json(body)
        {
            Ok(r) => r,
            Err(ureq::Error::Status(code, r)) => {
                let detail = r.into_string().unwrap_or_default();
                bail!("HTTP {code}: {}", detail.trim());
            }
            Err(e) => return Err(e).context("generateContent request failed"),
        };

        let parsed: GenerateResponse = resp.into_json().context("malformed generateContent response")?;
        response_text(&parsed).context("response contained no candidates")
    }
}
