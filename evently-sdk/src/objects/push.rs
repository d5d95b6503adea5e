//! Push message payloads in the FCM HTTP v1 wire format.

use serde::{Deserialize, Serialize};

/// Request body for a single-token send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSendRequest {
    pub message: PushMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Device registration token.
    pub token: String,
    pub notification: PushNotification,
    pub data: PushData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
}

/// Data payload read by the mobile client to highlight the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushData {
    #[serde(rename = "notificationID")]
    pub notification_id: String,
}

/// Successful send response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSendResponse {
    /// Server-assigned message name, e.g. `projects/p/messages/123`.
    pub name: String,
}

impl PushSendRequest {
    pub fn new(token: &str, title: &str, body: &str, correlation_id: &str) -> Self {
        Self {
            message: PushMessage {
                token: token.to_string(),
                notification: PushNotification {
                    title: title.to_string(),
                    body: body.to_string(),
                },
                data: PushData {
                    notification_id: correlation_id.to_string(),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_request_wire_shape() {
        let request = PushSendRequest::new("tok-1", "You won", "Open the app", "abc");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["message"]["token"], "tok-1");
        assert_eq!(json["message"]["notification"]["title"], "You won");
        assert_eq!(json["message"]["notification"]["body"], "Open the app");
        assert_eq!(json["message"]["data"]["notificationID"], "abc");
    }
}
