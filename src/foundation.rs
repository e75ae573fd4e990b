//! Foundation model request/response shapes.
//!
//! Each Bedrock model family takes its own request body and answers with
//! its own JSON layout. [`ModelFamily`] captures both sides:
//!
//! | Family | Id prefix | Prompt field | Answer path |
//! |--------|-----------|--------------|-------------|
//! | Titan Text | `amazon.titan` | `inputText` | `results[0].outputText` |
//! | Jurassic-2 | `ai21.j2` | `prompt` | `completions[0].data.text` |
//! | Claude | `anthropic.claude` | `prompt` (Human/Assistant framing) | `completion` |
//! | Command | `cohere.command` | `prompt` | `generations[0].text` |
//! | Llama 2 | `meta.llama2` | `prompt` | `generation` |
//!
//! The family is picked from the part of the model id before the first `-`.

use std::fmt;

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model '{0}' does not belong to a supported text model family")]
    UnsupportedModel(String),

    #[error("model '{model_id}' is not a text generation model")]
    NotTextModel { model_id: String },

    #[error("{family} response has no text at {path}")]
    MissingText { family: ModelFamily, path: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    TitanText,
    Jurassic2,
    Claude,
    CohereCommand,
    Llama2,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 5] = [
        ModelFamily::TitanText,
        ModelFamily::Jurassic2,
        ModelFamily::Claude,
        ModelFamily::CohereCommand,
        ModelFamily::Llama2,
    ];

    /// Id prefix shared by every model of the family.
    pub fn prefix(self) -> &'static str {
        match self {
            ModelFamily::TitanText => "amazon.titan",
            ModelFamily::Jurassic2 => "ai21.j2",
            ModelFamily::Claude => "anthropic.claude",
            ModelFamily::CohereCommand => "cohere.command",
            ModelFamily::Llama2 => "meta.llama2",
        }
    }

    pub fn from_model_id(model_id: &str) -> Result<Self, ModelError> {
        let key = model_id.split('-').next().unwrap_or_default();
        let family = Self::ALL
            .into_iter()
            .find(|f| f.prefix() == key)
            .ok_or_else(|| ModelError::UnsupportedModel(model_id.to_string()))?;

        if family == ModelFamily::TitanText
            && (model_id.contains("-embed") || model_id.contains("-image"))
        {
            return Err(ModelError::NotTextModel {
                model_id: model_id.to_string(),
            });
        }
        Ok(family)
    }

    /// Invocation body carrying `message` with the family's default
    /// generation parameters.
    pub fn request_body(self, message: &str) -> Value {
        match self {
            ModelFamily::TitanText => json!({
                "inputText": message,
                "textGenerationConfig": {
                    "maxTokenCount": 4096,
                    "stopSequences": [],
                    "temperature": 0,
                    "topP": 1
                }
            }),
            ModelFamily::Jurassic2 => json!({
                "prompt": message,
                "maxTokens": 200,
                "temperature": 0.5,
                "topP": 0.5
            }),
            ModelFamily::Claude => json!({
                "prompt": format!("\n\nHuman: {}\n\nAssistant:", message),
                "max_tokens_to_sample": 300,
                "temperature": 0.1,
                "top_p": 0.9
            }),
            ModelFamily::CohereCommand => json!({
                "prompt": message,
                "max_tokens": 200,
                "temperature": 0.5,
                "p": 0.5
            }),
            ModelFamily::Llama2 => json!({
                "prompt": message,
                "max_gen_len": 128,
                "temperature": 0.1,
                "top_p": 0.9
            }),
        }
    }

    /// JSON pointer to the generated text in a response.
    fn text_pointer(self) -> &'static str {
        match self {
            ModelFamily::TitanText => "/results/0/outputText",
            ModelFamily::Jurassic2 => "/completions/0/data/text",
            ModelFamily::Claude => "/completion",
            ModelFamily::CohereCommand => "/generations/0/text",
            ModelFamily::Llama2 => "/generation",
        }
    }

    pub fn extract_text(self, response: &Value) -> Result<String, ModelError> {
        response
            .pointer(self.text_pointer())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ModelError::MissingText {
                family: self,
                path: self.text_pointer(),
            })
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelFamily::TitanText => "Titan Text",
            ModelFamily::Jurassic2 => "Jurassic-2",
            ModelFamily::Claude => "Claude",
            ModelFamily::CohereCommand => "Command",
            ModelFamily::Llama2 => "Llama 2",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_from_catalogue_ids() {
        let cases = [
            ("amazon.titan-text-express-v1", ModelFamily::TitanText),
            ("amazon.titan-tg1-large", ModelFamily::TitanText),
            ("ai21.j2-ultra-v1", ModelFamily::Jurassic2),
            ("anthropic.claude-v2:1", ModelFamily::Claude),
            ("anthropic.claude-instant-v1", ModelFamily::Claude),
            ("cohere.command-light-text-v14", ModelFamily::CohereCommand),
            ("meta.llama2-70b-chat-v1", ModelFamily::Llama2),
        ];
        for (id, family) in cases {
            assert_eq!(ModelFamily::from_model_id(id).unwrap(), family, "{}", id);
        }
    }

    #[test]
    fn rejects_unknown_and_non_text_models() {
        assert_eq!(
            ModelFamily::from_model_id("mistral.mistral-7b-instruct-v0:2"),
            Err(ModelError::UnsupportedModel(
                "mistral.mistral-7b-instruct-v0:2".into()
            ))
        );
        assert!(matches!(
            ModelFamily::from_model_id("amazon.titan-embed-text-v1"),
            Err(ModelError::NotTextModel { .. })
        ));
    }

    #[test]
    fn claude_prompt_is_framed() {
        let body = ModelFamily::Claude.request_body("What is RAG?");
        assert_eq!(body["prompt"], "\n\nHuman: What is RAG?\n\nAssistant:");
        assert_eq!(body["max_tokens_to_sample"], 300);
    }

    #[test]
    fn titan_uses_input_text() {
        let body = ModelFamily::TitanText.request_body("hello");
        assert_eq!(body["inputText"], "hello");
        assert_eq!(body["textGenerationConfig"]["maxTokenCount"], 4096);
        assert!(body.get("prompt").is_none());
    }

    #[test]
    fn extracts_text_per_family() {
        let jurassic = json!({ "completions": [{ "data": { "text": "j2 says" } }] });
        assert_eq!(ModelFamily::Jurassic2.extract_text(&jurassic).unwrap(), "j2 says");

        let cohere = json!({ "generations": [{ "text": "cohere says" }] });
        assert_eq!(
            ModelFamily::CohereCommand.extract_text(&cohere).unwrap(),
            "cohere says"
        );
    }

    #[test]
    fn missing_text_names_the_path() {
        let err = ModelFamily::Llama2
            .extract_text(&json!({ "completion": "wrong family" }))
            .unwrap_err();
        assert_eq!(err.to_string(), "Llama 2 response has no text at /generation");
    }
}
