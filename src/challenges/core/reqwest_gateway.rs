//! Reqwest-based implementation of the `VerificationGateway` trait.
//!
//! Provides a thin adapter around `reqwest::Client` that posts JSON bodies to
//! the gateway paths and decodes the responses with the shared wire parsers.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use url::Url;

use super::gateway::{
    BehaviorReport, ChallengeSubmission, GatewayError, GatewayOperation, IssueDefaults,
    NextStepRequest, VerificationGateway, parse_issued, parse_next_step, parse_verify,
};
use super::types::{ChallengeKind, ConfidenceVerdict, IssuedChallenge, VerifyVerdict};
use crate::config::{MessageKey, WidgetConfig};

const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// Reqwest-backed gateway client.
pub struct ReqwestGateway {
    client: Client,
    base: Url,
    headers: HeaderMap,
    default_ttl: Duration,
    default_question: String,
}

impl ReqwestGateway {
    pub fn new(config: &WidgetConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Self::from_client(client, config)
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(client: Client, config: &WidgetConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref() {
            let value = HeaderValue::from_str(key)
                .map_err(|err| GatewayError::Transport(format!("invalid api key header: {err}")))?;
            headers.insert(API_KEY_HEADER, value);
        }

        Ok(Self {
            client,
            base: config.api_endpoint.clone(),
            headers,
            default_ttl: config.default_ttl,
            default_question: config.message(MessageKey::SelectImagesPrompt).to_string(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        operation: GatewayOperation,
        body: &B,
    ) -> Result<Bytes, GatewayError> {
        let url = self.base.join(operation.path())?;
        log::debug!("-> POST {url}");

        let response = self
            .client
            .post(url.as_str())
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                operation,
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))
    }
}

#[async_trait]
impl VerificationGateway for ReqwestGateway {
    async fn next_step(
        &self,
        request: &NextStepRequest,
    ) -> Result<ConfidenceVerdict, GatewayError> {
        let body = self.post(GatewayOperation::NextStep, request).await?;
        parse_next_step(&body)
    }

    async fn fetch_challenge(&self, kind: ChallengeKind) -> Result<IssuedChallenge, GatewayError> {
        let operation =
            GatewayOperation::fetch_for(kind).ok_or(GatewayError::UnsupportedKind(kind))?;
        let body = self.post(operation, &json!({})).await?;
        parse_issued(
            kind,
            &body,
            &IssueDefaults {
                base: &self.base,
                ttl: self.default_ttl,
                question: &self.default_question,
            },
        )
    }

    async fn verify(
        &self,
        submission: &ChallengeSubmission,
    ) -> Result<VerifyVerdict, GatewayError> {
        let operation = submission.operation();
        let body = self.post(operation, &submission.body()).await?;
        parse_verify(operation, &body)
    }

    async fn report_behavior(&self, report: &BehaviorReport) -> Result<(), GatewayError> {
        self.post(report.channel.operation(), report).await?;
        Ok(())
    }
}
