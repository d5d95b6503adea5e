//! Multicast push delivery.

pub mod fcm;

pub use fcm::FcmTransport;

use async_trait::async_trait;
use thiserror::Error;

/// One message addressed to many device tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastMessage {
    pub tokens: Vec<String>,
    pub title: String,
    pub body: String,
    /// Carried in the data payload so the client can open the right item.
    pub correlation_id: String,
}

/// Delivery result for one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub token: String,
    /// Message id on success, reason on failure.
    pub result: Result<String, String>,
}

/// Per-token results, in the order of [`MulticastMessage::tokens`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MulticastResponse {
    pub responses: Vec<SendResult>,
}

impl MulticastResponse {
    pub fn success_count(&self) -> usize {
        self.responses.iter().filter(|r| r.result.is_ok()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.responses.len() - self.success_count()
    }

    pub fn failed_tokens(&self) -> Vec<String> {
        self.responses
            .iter()
            .filter(|r| r.result.is_err())
            .map(|r| r.token.clone())
            .collect()
    }
}

/// Errors that stop a multicast before any token is attempted.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Sends a message to many device tokens.
///
/// A rejected token is reported in the response, never as an `Err`.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_tallies() {
        let response = MulticastResponse {
            responses: vec![
                SendResult {
                    token: "t1".to_string(),
                    result: Ok("projects/p/messages/1".to_string()),
                },
                SendResult {
                    token: "t2".to_string(),
                    result: Err("status 404 Not Found: UNREGISTERED".to_string()),
                },
                SendResult {
                    token: "t3".to_string(),
                    result: Err("status 400 Bad Request: INVALID_ARGUMENT".to_string()),
                },
            ],
        };
        assert_eq!(response.success_count(), 1);
        assert_eq!(response.failure_count(), 2);
        assert_eq!(response.failed_tokens(), vec!["t2", "t3"]);
    }
}
