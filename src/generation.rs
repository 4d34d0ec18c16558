//! The text-generation collaborator: a single prompt in, generated text out.

use std::time::Duration;

use log::debug;
use serde_json::{Value, json};

use crate::error::{GenerationError, RAGError, Result};

/// Greedy decoding; grounded legal answers favour reproducibility over variety.
pub const TEMPERATURE: f32 = 0.0;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
}

pub trait Generator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError>;
}

/// Gemini `generateContent` over HTTP.
pub struct GeminiGenerator {
    client: reqwest::blocking::Client,
    api_key: String,
    api_base: String,
}

impl GeminiGenerator {
    pub fn new(api_key: String, api_base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RAGError::Generation(GenerationError::Http(e)))?;
        Ok(Self {
            client,
            api_key,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn build_request_body(request: &GenerationRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }],
            }],
            "generationConfig": {
                "temperature": request.temperature,
            },
        })
    }

    /// Concatenates the text parts of the first candidate.
    fn parse_response(body: &Value) -> std::result::Result<String, GenerationError> {
        let parts = body["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| GenerationError::Parse("missing candidates[0].content.parts".into()))?;

        let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
        if text.is_empty() {
            let reason = body["candidates"][0]["finishReason"]
                .as_str()
                .unwrap_or("unknown");
            return Err(GenerationError::Parse(format!(
                "candidate has no text (finish reason: {reason})"
            )));
        }
        Ok(text)
    }
}

impl Generator for GeminiGenerator {
    fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.api_base, request.model);
        debug!(
            "Gemini request to model={} prompt_chars={}",
            request.model,
            request.prompt.chars().count()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_request_body(request))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json()?;
        Self::parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_prompt_and_temperature() {
        let request = GenerationRequest {
            model: "gemini-2.5-flash".into(),
            prompt: "What does article 5 say?".into(),
            temperature: TEMPERATURE,
        };
        let body = GeminiGenerator::build_request_body(&request);

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "What does article 5 say?");
        assert_eq!(body["generationConfig"]["temperature"].as_f64(), Some(0.0));
    }

    #[test]
    fn parse_response_joins_text_parts() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Article 5 " }, { "text": "covers leases." }] },
                "finishReason": "STOP",
            }]
        });
        assert_eq!(
            GeminiGenerator::parse_response(&body).unwrap(),
            "Article 5 covers leases."
        );
    }

    #[test]
    fn parse_response_rejects_malformed_bodies() {
        assert!(matches!(
            GeminiGenerator::parse_response(&json!({ "error": "quota" })),
            Err(GenerationError::Parse(_))
        ));

        let blocked = json!({
            "candidates": [{ "content": { "parts": [] }, "finishReason": "SAFETY" }]
        });
        let err = GeminiGenerator::parse_response(&blocked).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }
}
