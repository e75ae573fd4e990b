//! AWS service client.
//!
//! [`AwsClient`] talks to the managed services over plain HTTPS with
//! SigV4-signed requests (see [`sigv4`]). One client implements all three
//! service seams:
//!
//! | Trait | Services | Protocol |
//! |-------|----------|----------|
//! | [`ResourceApi`](crate::traits::ResourceApi) | `aoss`, `bedrock-agent`, collection endpoint | AWS JSON 1.0, REST-JSON, OpenSearch REST |
//! | [`AccountApi`](crate::traits::AccountApi) | `iam`, `s3` | query/XML, REST-XML |
//! | [`ModelApi`](crate::traits::ModelApi) | `bedrock`, `bedrock-runtime`, `bedrock-agent-runtime` | REST-JSON |
//!
//! Credentials come from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and
//! `AWS_SESSION_TOKEN`. Hosts follow the public endpoint pattern for the
//! configured region unless overridden under `[aws.endpoints]`.
//!
//! Every request is sent exactly once. Errors are decoded into
//! [`ApiError`], with not-found conditions mapped to
//! [`ApiError::NotFound`].

mod account;
mod resources;
mod runtime;
pub mod sigv4;

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::AwsConfig;
use crate::error::ApiError;
use sigv4::{Credentials, RequestParts};

/// Services the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    BedrockAgent,
    Bedrock,
    BedrockRuntime,
    BedrockAgentRuntime,
    Aoss,
    Iam,
    S3,
}

impl Service {
    /// Key used in `[aws.endpoints]` and in error messages.
    pub fn key(self) -> &'static str {
        match self {
            Service::BedrockAgent => "bedrock-agent",
            Service::Bedrock => "bedrock",
            Service::BedrockRuntime => "bedrock-runtime",
            Service::BedrockAgentRuntime => "bedrock-agent-runtime",
            Service::Aoss => "aoss",
            Service::Iam => "iam",
            Service::S3 => "s3",
        }
    }

    /// Service name in the SigV4 credential scope.
    fn signing_name(self) -> &'static str {
        match self {
            Service::BedrockAgent
            | Service::Bedrock
            | Service::BedrockRuntime
            | Service::BedrockAgentRuntime => "bedrock",
            Service::Aoss => "aoss",
            Service::Iam => "iam",
            Service::S3 => "s3",
        }
    }

    fn default_host(self, region: &str) -> String {
        match self {
            Service::Iam => "iam.amazonaws.com".to_string(),
            other => format!("{}.{}.amazonaws.com", other.key(), region),
        }
    }

    /// S3 and OpenSearch Serverless require a signed
    /// `x-amz-content-sha256` header.
    fn signs_payload_hash(self) -> bool {
        matches!(self, Service::S3 | Service::Aoss)
    }

    /// IAM is global and always signs for `us-east-1`.
    fn signing_region(self, region: &str) -> &str {
        match self {
            Service::Iam => "us-east-1",
            _ => region,
        }
    }
}

/// Scheme and host of a service endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
}

impl Endpoint {
    pub fn https(host: impl Into<String>) -> Self {
        Self {
            scheme: "https".to_string(),
            host: host.into(),
        }
    }

    /// Parse `http://host:port`, `https://host`, or a bare host.
    pub fn parse(url: &str) -> Self {
        let (scheme, rest) = match url.split_once("://") {
            Some((scheme, rest)) => (scheme.to_string(), rest),
            None => ("https".to_string(), url),
        };
        Self {
            scheme,
            host: rest.trim_end_matches('/').to_string(),
        }
    }
}

/// A request before signing. `path` is raw; encoding happens at send time.
struct ApiRequest {
    service: Service,
    endpoint: Endpoint,
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

/// Status, error-type header, and body of a response.
struct ApiResponse {
    status: u16,
    error_type: Option<String>,
    body: String,
}

/// Client for every AWS API the harness uses.
pub struct AwsClient {
    http: reqwest::Client,
    credentials: Credentials,
    region: String,
    endpoints: BTreeMap<String, String>,
}

impl AwsClient {
    /// Build a client from config, reading credentials from the environment.
    pub fn from_config(config: &AwsConfig) -> Result<Self> {
        Ok(Self::new(config, Credentials::from_env()?))
    }

    pub fn new(config: &AwsConfig, credentials: Credentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            region: config.region.clone(),
            endpoints: config.endpoints.clone(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Endpoint for `service`: the configured override or the public host.
    pub fn endpoint(&self, service: Service) -> Endpoint {
        match self.endpoints.get(service.key()) {
            Some(url) => Endpoint::parse(url),
            None => Endpoint::https(service.default_host(&self.region)),
        }
    }

    /// SigV4 headers for `request` at `now`.
    fn auth_headers(&self, request: &ApiRequest, now: DateTime<Utc>) -> Vec<(String, String)> {
        let service = request.service;
        let canonical_uri = sigv4::canonical_uri(&request.path, service != Service::S3);
        let parts = RequestParts {
            method: request.method.as_str(),
            host: &request.endpoint.host,
            canonical_uri: &canonical_uri,
            query: &request.query,
            headers: &request.headers,
            payload: &request.body,
            content_sha256_header: service.signs_payload_hash(),
        };
        sigv4::sign(
            &self.credentials,
            service.signing_region(&self.region),
            service.signing_name(),
            &parts,
            now,
        )
    }

    /// Sign and send `request` once; non-2xx statuses are returned, not
    /// turned into errors.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let service = request.service;
        let auth_headers = self.auth_headers(&request, Utc::now());

        let mut url = format!(
            "{}://{}{}",
            request.endpoint.scheme,
            request.endpoint.host,
            sigv4::encode_path(&request.path)
        );
        if !request.query.is_empty() {
            url.push('?');
            url.push_str(&sigv4::canonical_query(&request.query));
        }

        debug!(service = service.key(), method = %request.method, %url, "sending request");

        let mut builder = self.http.request(request.method.clone(), &url);
        for (name, value) in request.headers.iter().chain(auth_headers.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(|source| ApiError::Transport {
            service: service.key().to_string(),
            source,
        })?;

        let status = response.status().as_u16();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|source| ApiError::Transport {
            service: service.key().to_string(),
            source,
        })?;

        debug!(service = service.key(), status, bytes = body.len(), "received response");
        Ok(ApiResponse {
            status,
            error_type,
            body,
        })
    }

    /// Send and turn non-2xx responses into [`ApiError`].
    async fn send_checked(&self, request: ApiRequest) -> Result<String, ApiError> {
        let service = request.service;
        let resource = request.path.clone();
        let response = self.send(request).await?;
        if (200..300).contains(&response.status) {
            return Ok(response.body);
        }
        Err(decode_error(
            service,
            &resource,
            response.status,
            response.error_type.as_deref(),
            &response.body,
        ))
    }

    /// REST-JSON call against a regional service endpoint.
    async fn rest_json(
        &self,
        service: Service,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let (headers, body) = match body {
            Some(value) => (
                vec![("content-type".to_string(), "application/json".to_string())],
                value.to_string().into_bytes(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        let text = self
            .send_checked(ApiRequest {
                service,
                endpoint: self.endpoint(service),
                method,
                path: path.to_string(),
                query,
                headers,
                body,
            })
            .await?;
        parse_json(service, &text)
    }

    /// AWS JSON 1.0 call (`X-Amz-Target` dispatch) against OpenSearch
    /// Serverless.
    async fn aoss_json(&self, operation: &str, body: &Value) -> Result<Value, ApiError> {
        let text = self
            .send_checked(ApiRequest {
                service: Service::Aoss,
                endpoint: self.endpoint(Service::Aoss),
                method: Method::POST,
                path: "/".to_string(),
                query: Vec::new(),
                headers: vec![
                    (
                        "content-type".to_string(),
                        "application/x-amz-json-1.0".to_string(),
                    ),
                    (
                        "x-amz-target".to_string(),
                        format!("OpenSearchServerless.{}", operation),
                    ),
                ],
                body: body.to_string().into_bytes(),
            })
            .await?;
        parse_json(Service::Aoss, &text)
    }
}

fn parse_json(service: Service, text: &str) -> Result<Value, ApiError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| ApiError::decode(service.key(), e.to_string()))
}

/// Deserialize `value[field]` into `T`.
fn field<T: DeserializeOwned>(service: Service, value: &Value, name: &str) -> Result<T, ApiError> {
    let inner = value
        .get(name)
        .cloned()
        .ok_or_else(|| ApiError::decode(service.key(), format!("missing field '{}'", name)))?;
    serde_json::from_value(inner)
        .map_err(|e| ApiError::decode(service.key(), format!("field '{}': {}", name, e)))
}

/// Map an error response to [`ApiError`].
///
/// The error code is taken from the `x-amzn-ErrorType` header, then from the
/// JSON `__type` / `code` fields, then from an XML `<Code>` element. HTTP 404
/// and the not-found codes of each service become [`ApiError::NotFound`].
fn decode_error(
    service: Service,
    resource: &str,
    status: u16,
    error_type: Option<&str>,
    body: &str,
) -> ApiError {
    let json: Option<Value> = serde_json::from_str(body).ok();

    let code = error_type
        .and_then(|t| t.split(':').next())
        .map(str::to_string)
        .or_else(|| {
            json.as_ref()
                .and_then(|v| v.get("__type").or_else(|| v.get("code")))
                .and_then(Value::as_str)
                .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        })
        .or_else(|| json.as_ref().and_then(opensearch_error_type))
        .or_else(|| extract_xml_value(body, "Code"))
        .unwrap_or_else(|| format!("HTTP{}", status));

    let message = json
        .as_ref()
        .and_then(|v| v.get("message").or_else(|| v.get("Message")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| extract_xml_value(body, "Message"))
        .unwrap_or_else(|| body.chars().take(500).collect());

    let not_found = status == 404
        || code.ends_with("NotFoundException")
        || code == "NoSuchEntity"
        || code == "NoSuchBucket"
        || code == "index_not_found_exception";
    if not_found {
        return ApiError::not_found(format!("{} {}", service.key(), resource));
    }
    ApiError::service(service.key(), status, code, message)
}

/// `error.type` of an OpenSearch REST error body.
fn opensearch_error_type(v: &Value) -> Option<String> {
    v.get("error")?.get("type")?.as_str().map(str::to_string)
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

/// Idempotency token for create calls.
fn client_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoints: &[(&str, &str)]) -> AwsClient {
        let config = AwsConfig {
            region: "eu-west-1".into(),
            endpoints: endpoints
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        AwsClient::new(
            &config,
            Credentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            },
        )
    }

    #[test]
    fn default_endpoints_follow_region() {
        let c = client(&[]);
        assert_eq!(
            c.endpoint(Service::BedrockAgent),
            Endpoint::https("bedrock-agent.eu-west-1.amazonaws.com")
        );
        assert_eq!(c.endpoint(Service::Aoss).host, "aoss.eu-west-1.amazonaws.com");
        assert_eq!(c.endpoint(Service::Iam).host, "iam.amazonaws.com");
        assert_eq!(Service::Iam.signing_region("eu-west-1"), "us-east-1");
        assert_eq!(Service::BedrockAgentRuntime.signing_name(), "bedrock");
    }

    #[test]
    fn endpoint_overrides_keep_scheme_and_port() {
        let c = client(&[("aoss", "http://localhost:4566/")]);
        assert_eq!(
            c.endpoint(Service::Aoss),
            Endpoint {
                scheme: "http".into(),
                host: "localhost:4566".into()
            }
        );
        assert_eq!(c.endpoint(Service::S3).host, "s3.eu-west-1.amazonaws.com");
    }

    #[test]
    fn resource_not_found_from_json_type() {
        let err = decode_error(
            Service::Aoss,
            "/",
            400,
            None,
            r#"{"__type":"com.amazonaws.aoss#ResourceNotFoundException","message":"Policy not found"}"#,
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn not_found_from_status_and_header() {
        assert!(decode_error(Service::BedrockAgent, "/knowledgebases/KB1", 404, None, "").is_not_found());
        let err = decode_error(
            Service::BedrockAgent,
            "/knowledgebases/KB1",
            400,
            Some("ResourceNotFoundException:http://internal.amazon.com/"),
            "{}",
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn iam_missing_role_is_not_found() {
        let body = "<ErrorResponse><Error><Type>Sender</Type><Code>NoSuchEntity</Code>\
                    <Message>The role with name x cannot be found.</Message></Error></ErrorResponse>";
        assert!(decode_error(Service::Iam, "/", 400, None, body).is_not_found());
    }

    #[test]
    fn other_errors_keep_code_and_message() {
        let err = decode_error(
            Service::BedrockAgent,
            "/knowledgebases/",
            403,
            Some("AccessDeniedException"),
            r#"{"message":"User is not authorized"}"#,
        );
        match err {
            ApiError::Service {
                service,
                status,
                code,
                message,
            } => {
                assert_eq!(service, "bedrock-agent");
                assert_eq!(status, 403);
                assert_eq!(code, "AccessDeniedException");
                assert_eq!(message, "User is not authorized");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn opensearch_index_errors_are_decoded() {
        let err = decode_error(
            Service::Aoss,
            "/bedrock-knowledge-base-default-index",
            400,
            None,
            r#"{"error":{"type":"resource_already_exists_exception","reason":"exists"},"status":400}"#,
        );
        assert!(matches!(err, ApiError::Service { ref code, .. } if code == "resource_already_exists_exception"));
    }

    #[test]
    fn field_reports_missing_keys() {
        let v = serde_json::json!({ "a": 1 });
        let got: u32 = field(Service::Bedrock, &v, "a").unwrap();
        assert_eq!(got, 1);
        let err = field::<u32>(Service::Bedrock, &v, "b").unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }
}
