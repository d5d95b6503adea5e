//! FCM HTTP v1 transport.
//!
//! HTTP v1 has no multicast call, so each token gets its own request. The
//! requests run concurrently and their outcomes are collected per token.

use crate::config::PushConfig;
use crate::push::{MulticastMessage, MulticastResponse, PushTransport, SendResult, TransportError};
use async_trait::async_trait;
use evently_sdk::objects::push::{PushSendRequest, PushSendResponse};
use futures_util::future::join_all;
use tracing::debug;
use url::Url;

pub struct FcmTransport {
    endpoint: Url,
    access_token: String,
    http_client: reqwest::Client,
}

impl FcmTransport {
    pub fn new(config: &PushConfig) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            access_token: config.access_token.clone(),
            http_client,
        })
    }

    async fn send_one(&self, token: &str, message: &MulticastMessage) -> SendResult {
        let request = PushSendRequest::new(
            token,
            &message.title,
            &message.body,
            &message.correlation_id,
        );

        let result = match self
            .http_client
            .post(self.endpoint.clone())
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                match response.json::<PushSendResponse>().await {
                    Ok(sent) => Ok(sent.name),
                    Err(e) => Err(format!("unreadable response: {e}")),
                }
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(format!("status {status}: {body}"))
            }
            Err(e) => Err(e.to_string()),
        };

        debug!(ok = result.is_ok(), "FCM send finished");
        SendResult {
            token: token.to_string(),
            result,
        }
    }
}

#[async_trait]
impl PushTransport for FcmTransport {
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse, TransportError> {
        let responses = join_all(
            message
                .tokens
                .iter()
                .map(|token| self.send_one(token, message)),
        )
        .await;
        Ok(MulticastResponse { responses })
    }
}
