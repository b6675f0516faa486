//! Gemini client for the AI health assistant.
//!
//! Sends a symptom description to the Gemini generateContent API with a
//! fixed informational prompt and conservative safety settings, and returns
//! the generated insight text.

use crate::config::GeminiConfig;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("AI provider not configured")]
    NotConfigured,

    #[error("AI provider error: {0}")]
    Api(String),

    #[error("AI response blocked: {0}")]
    Blocked(String),

    #[error("AI returned an empty response")]
    Empty,
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<ContentPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if Gemini is configured (API key is set).
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.expose_secret().is_empty()
    }

    /// Generate a general-information insight for a symptom description.
    pub async fn generate_insight(&self, symptoms: &str) -> Result<String, InsightError> {
        if !self.is_configured() {
            return Err(InsightError::NotConfigured);
        }

        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![ContentPart {
                    text: insight_prompt(symptoms),
                }],
            }],
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: category.to_string(),
                    threshold: "BLOCK_MEDIUM_AND_ABOVE".to_string(),
                })
                .collect(),
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.api_base_url,
            self.config.model,
            self.config.api_key.expose_secret()
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| InsightError::Api(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Gemini API request failed");
            return Err(InsightError::Api(format!("Gemini API error {}", status)));
        }

        let api_response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| InsightError::Api(format!("Failed to parse response: {}", e)))?;

        if let Some(reason) = api_response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
        {
            return Err(InsightError::Blocked(reason));
        }

        let candidate = api_response.candidates.first();

        if candidate.and_then(|c| c.finish_reason.as_deref()) == Some("SAFETY") {
            return Err(InsightError::Blocked("SAFETY".to_string()));
        }

        let text = candidate
            .and_then(|c| c.content.as_ref())
            .and_then(|content| content.parts.first())
            .map(|part| part.text.trim().to_string())
            .filter(|text| !text.is_empty());

        text.ok_or(InsightError::Empty)
    }
}

/// The assistant prompt: general health information only, with a mandatory
/// disclaimer and no diagnosis, treatment, or follow-up questions.
fn insight_prompt(symptoms: &str) -> String {
    format!(
        r#"You are "ProHealth Connect AI Assistant," a helpful AI designed to provide general health information.

A user has described the following symptoms: "{symptoms}"

Based on these symptoms, please provide some general information about potential common conditions or factors that MIGHT be associated with them.
Structure your response clearly. If appropriate, use bullet points for different possibilities.
Your entire response should be for informational purposes ONLY.

CRITICAL INSTRUCTIONS - YOU MUST FOLLOW THESE:

DO NOT PROVIDE MEDICAL DIAGNOSIS. Do not state or imply that the user has any specific condition.

DO NOT SUGGEST SPECIFIC TREATMENTS, MEDICATIONS, OR DOSAGES.

DO NOT ASK FOLLOW-UP QUESTIONS TO GATHER MORE MEDICAL DETAILS FROM THE USER.

ALWAYS INCLUDE THE FOLLOWING DISCLAIMER VERBATIM AT THE VERY END OF YOUR RESPONSE:
"Disclaimer: This information is not medical advice. Please consult with a qualified healthcare professional for any health concerns or before making any decisions related to your health."

If the user's input is too vague, clearly inappropriate for your function, or describes what seems to be a very serious medical emergency, you must politely state that you cannot provide specific information and that they should seek immediate medical attention from a healthcare professional.

Keep your response to a helpful length, focusing on general information."#
    )
}
