use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{Classification, Classify, ClassifyError, Taxonomy};

const SYSTEM_PROMPT: &str = "You are a market research taxonomy classifier.

RULES:
- Choose ONLY from provided sub-industries.
- DO NOT invent anything.
- If unsure, return NOT_FOUND.
- Output valid JSON only.";

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiClassifier {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    taxonomy: Taxonomy,
}

impl OpenAiClassifier {
    pub fn new(
        endpoint: &str,
        api_key: String,
        model: &str,
        timeout: Duration,
        taxonomy: Taxonomy,
    ) -> Result<Self, ClassifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(OpenAiClassifier {
            client,
            endpoint: endpoint.to_string(),
            api_key,
            model: model.to_string(),
            taxonomy,
        })
    }
}

pub fn user_prompt(title: &str, taxonomy: &Taxonomy) -> String {
    format!(
        r#"Report Title:
"{}"

Industry: {}
Sub-Industries: {}

Return JSON:
{{
  "industry": "",
  "sub_industry": "",
  "confidence": ""
}}"#,
        title,
        taxonomy.industry,
        taxonomy.sub_industries.join(", ")
    )
}

/// Decode the JSON object the model was told to return.
pub fn parse_reply(content: &str) -> Result<Classification, ClassifyError> {
    Ok(serde_json::from_str(content.trim())?)
}

impl Classify for OpenAiClassifier {
    fn classify(&self, title: &str) -> Result<Classification, ClassifyError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(title, &self.taxonomy) },
            ],
            "temperature": 0,
            "response_format": { "type": "json_object" },
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ClassifyError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = resp.json()?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ClassifyError::EmptyReply)?;
        debug!(title, reply = %content, "classification reply");
        parse_reply(&content)
    }
}
