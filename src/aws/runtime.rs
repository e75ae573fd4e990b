//! [`ModelApi`] over the Bedrock catalogue, runtime, and agent runtime.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use super::{field, parse_json, ApiRequest, AwsClient, Service};
use crate::error::ApiError;
use crate::models::{FoundationModelSummary, RagAnswer, RagRequest};
use crate::traits::ModelApi;

#[async_trait]
impl ModelApi for AwsClient {
    async fn list_foundation_models(&self) -> Result<Vec<FoundationModelSummary>, ApiError> {
        let reply = self
            .rest_json(
                Service::Bedrock,
                Method::GET,
                "/foundation-models",
                vec![
                    ("byOutputModality".to_string(), "TEXT".to_string()),
                    ("byInferenceType".to_string(), "ON_DEMAND".to_string()),
                ],
                None,
            )
            .await?;
        field(Service::Bedrock, &reply, "modelSummaries")
    }

    async fn invoke_model(&self, model_id: &str, body: &Value) -> Result<Value, ApiError> {
        let text = self
            .send_checked(ApiRequest {
                service: Service::BedrockRuntime,
                endpoint: self.endpoint(Service::BedrockRuntime),
                method: Method::POST,
                path: format!("/model/{}/invoke", model_id),
                query: Vec::new(),
                headers: vec![
                    ("accept".to_string(), "application/json".to_string()),
                    ("content-type".to_string(), "application/json".to_string()),
                ],
                body: body.to_string().into_bytes(),
            })
            .await?;
        parse_json(Service::BedrockRuntime, &text)
    }

    async fn retrieve_and_generate(&self, request: &RagRequest) -> Result<RagAnswer, ApiError> {
        let body = json!({
            "input": { "text": request.prompt },
            "retrieveAndGenerateConfiguration": {
                "type": "KNOWLEDGE_BASE",
                "knowledgeBaseConfiguration": {
                    "knowledgeBaseId": request.knowledge_base_id,
                    "modelArn": request.model_arn,
                },
            },
        });
        let reply = self
            .rest_json(
                Service::BedrockAgentRuntime,
                Method::POST,
                "/retrieveAndGenerate",
                Vec::new(),
                Some(&body),
            )
            .await?;
        parse_rag_answer(&reply)
    }
}

fn parse_rag_answer(reply: &Value) -> Result<RagAnswer, ApiError> {
    let text = reply
        .pointer("/output/text")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ApiError::decode(Service::BedrockAgentRuntime.key(), "response has no output.text")
        })?
        .to_string();

    let mut sources: Vec<String> = Vec::new();
    let citations = reply.get("citations").and_then(Value::as_array);
    for citation in citations.into_iter().flatten() {
        let references = citation
            .get("retrievedReferences")
            .and_then(Value::as_array);
        for reference in references.into_iter().flatten() {
            if let Some(uri) = reference
                .pointer("/location/s3Location/uri")
                .and_then(Value::as_str)
            {
                if !sources.iter().any(|s| s == uri) {
                    sources.push(uri.to_string());
                }
            }
        }
    }

    Ok(RagAnswer {
        text,
        session_id: reply
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string),
        sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rag_answer_collects_unique_sources() {
        let reply = json!({
            "output": { "text": "Vacation requests go through the HR portal." },
            "sessionId": "3f0b1c",
            "citations": [
                { "retrievedReferences": [
                    { "location": { "type": "S3", "s3Location": { "uri": "s3://docs/hr.md" } } },
                    { "location": { "type": "S3", "s3Location": { "uri": "s3://docs/faq.md" } } }
                ]},
                { "retrievedReferences": [
                    { "location": { "type": "S3", "s3Location": { "uri": "s3://docs/hr.md" } } }
                ]}
            ]
        });
        let answer = parse_rag_answer(&reply).unwrap();
        assert_eq!(answer.text, "Vacation requests go through the HR portal.");
        assert_eq!(answer.session_id.as_deref(), Some("3f0b1c"));
        assert_eq!(answer.sources, vec!["s3://docs/hr.md", "s3://docs/faq.md"]);
    }

    #[test]
    fn rag_answer_without_citations() {
        let answer = parse_rag_answer(&json!({ "output": { "text": "No idea." } })).unwrap();
        assert!(answer.sources.is_empty());
        assert!(answer.session_id.is_none());
    }

    #[test]
    fn rag_answer_requires_text() {
        assert!(parse_rag_answer(&json!({ "citations": [] })).is_err());
    }
}
