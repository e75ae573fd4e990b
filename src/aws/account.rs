//! [`AccountApi`] over IAM (`GetRole`) and S3 (`ListBuckets`).
//!
//! Both answer in XML; the few values needed are pulled out with plain
//! string scanning.

use async_trait::async_trait;
use reqwest::Method;

use super::{extract_xml_value, ApiRequest, AwsClient, Service};
use crate::error::ApiError;
use crate::traits::AccountApi;

#[async_trait]
impl AccountApi for AwsClient {
    async fn role_arn(&self, role_name: &str) -> Result<String, ApiError> {
        let xml = self
            .send_checked(ApiRequest {
                service: Service::Iam,
                endpoint: self.endpoint(Service::Iam),
                method: Method::GET,
                path: "/".to_string(),
                query: vec![
                    ("Action".to_string(), "GetRole".to_string()),
                    ("RoleName".to_string(), role_name.to_string()),
                    ("Version".to_string(), "2010-05-08".to_string()),
                ],
                headers: Vec::new(),
                body: Vec::new(),
            })
            .await?;
        parse_role_arn(&xml)
    }

    async fn list_buckets(&self) -> Result<Vec<String>, ApiError> {
        let xml = self
            .send_checked(ApiRequest {
                service: Service::S3,
                endpoint: self.endpoint(Service::S3),
                method: Method::GET,
                path: "/".to_string(),
                query: Vec::new(),
                headers: Vec::new(),
                body: Vec::new(),
            })
            .await?;
        Ok(parse_bucket_names(&xml))
    }
}

fn parse_role_arn(xml: &str) -> Result<String, ApiError> {
    let role = extract_xml_value(xml, "Role").unwrap_or_else(|| xml.to_string());
    extract_xml_value(&role, "Arn")
        .map(|arn| arn.trim().to_string())
        .ok_or_else(|| ApiError::decode(Service::Iam.key(), "GetRole response has no <Arn>"))
}

/// Bucket names from a `ListAllMyBucketsResult`, in listing order.
fn parse_bucket_names(xml: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find("<Bucket>") {
        let block_start = start + "<Bucket>".len();
        let Some(end) = remaining[block_start..].find("</Bucket>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        if let Some(name) = extract_xml_value(block, "Name") {
            names.push(name);
        }
        remaining = &remaining[block_start + end + "</Bucket>".len()..];
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_arn_from_get_role_response() {
        let xml = r#"<GetRoleResponse xmlns="https://iam.amazonaws.com/doc/2010-05-08/">
  <GetRoleResult>
    <Role>
      <Path>/service-role/</Path>
      <RoleName>AmazonBedrockExecutionRoleForKnowledgeBase_Default</RoleName>
      <RoleId>AROAEXAMPLE</RoleId>
      <Arn>arn:aws:iam::123456789012:role/service-role/AmazonBedrockExecutionRoleForKnowledgeBase_Default</Arn>
      <CreateDate>2024-01-01T00:00:00Z</CreateDate>
    </Role>
  </GetRoleResult>
</GetRoleResponse>"#;
        assert_eq!(
            parse_role_arn(xml).unwrap(),
            "arn:aws:iam::123456789012:role/service-role/AmazonBedrockExecutionRoleForKnowledgeBase_Default"
        );
    }

    #[test]
    fn role_without_arn_is_a_decode_error() {
        let err = parse_role_arn("<GetRoleResponse/>").unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[test]
    fn bucket_names_in_listing_order() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult>
  <Owner><ID>abc</ID></Owner>
  <Buckets>
    <Bucket><Name>logs</Name><CreationDate>2023-01-01T00:00:00.000Z</CreationDate></Bucket>
    <Bucket><Name>amazon-bedrock-knowledge-base-abc123</Name><CreationDate>2023-02-01T00:00:00.000Z</CreationDate></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;
        assert_eq!(
            parse_bucket_names(xml),
            vec!["logs", "amazon-bedrock-knowledge-base-abc123"]
        );
        assert!(parse_bucket_names("<Buckets></Buckets>").is_empty());
    }
}
