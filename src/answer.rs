//! Answer generation from retrieved passages.
//!
//! The generator is an external collaborator: it takes the question and the
//! ranked passages and returns prose. Two implementations:
//! - [`OpenAiChat`] calls `POST /v1/chat/completions`.
//! - [`Extractive`] returns the best passage verbatim, offline.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use docqa_core::models::RetrievalResult;

use crate::config::GenerationConfig;

/// Printed when retrieval produced nothing usable.
pub const NO_CONTEXT_ANSWER: &str =
    "I could not find anything relevant to this question in the documentation.";

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str, passages: &[RetrievalResult]) -> Result<String>;
}

/// Build the user prompt: numbered context passages, then the question.
pub fn build_prompt(question: &str, passages: &[RetrievalResult]) -> String {
    let mut prompt = String::from("Context information is below.\n---------------------\n");
    for (i, passage) in passages.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] (source: {})\n{}\n\n",
            i + 1,
            passage.chunk.document_id,
            passage.chunk.text.trim()
        ));
    }
    prompt.push_str("---------------------\n");
    prompt.push_str(
        "Given the context information and not prior knowledge, answer the question. \
         If the context does not contain the answer, say so.\n",
    );
    prompt.push_str(&format!("Question: {}\nAnswer:", question.trim()));
    prompt
}

pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    url: String,
}

impl OpenAiChat {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiChat {
    async fn generate(&self, question: &str, passages: &[RetrievalResult]) -> Result<String> {
        if passages.is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {
                    "role": "system",
                    "content": "You answer questions about internal documentation using only the provided context."
                },
                {
                    "role": "user",
                    "content": build_prompt(question, passages)
                }
            ]
        });

        let response = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.url.trim_end_matches('/')
            ))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("OpenAI chat request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI chat API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI chat response: missing message content"))
}

/// Answers with the highest-ranked passage itself.
pub struct Extractive;

#[async_trait]
impl AnswerGenerator for Extractive {
    async fn generate(&self, _question: &str, passages: &[RetrievalResult]) -> Result<String> {
        match passages.first() {
            Some(best) if best.score > 0.0 => Ok(best.chunk.text.trim().to_string()),
            _ => Ok(NO_CONTEXT_ANSWER.to_string()),
        }
    }
}

/// Create the generator named by `config.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "extractive" => Ok(Box::new(Extractive)),
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY").context(
                "OPENAI_API_KEY environment variable not set (or set generation.provider = \"extractive\")",
            )?;
            Ok(Box::new(OpenAiChat::new(config, api_key)?))
        }
        other => bail!("Unknown generation provider: {}", other),
    }
}
