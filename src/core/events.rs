//! Frame types exchanged with the realtime server
//!
//! Inbound frames share one envelope, `{"type": ..., "data": ...}`. The
//! `type` value is opaque here; subscribers decide what it means.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded server-pushed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type")]
    pub kind: String,
    /// Missing `data` decodes as `null`
    #[serde(default)]
    pub data: Value,
}

impl InboundEvent {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Decode the payload into a subscriber's own type
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Frames this crate sends on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Auth {
        token: String,
        #[serde(rename = "userId")]
        user_id: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_frame_shape() {
        let frame = OutboundFrame::Auth {
            token: "t0k".into(),
            user_id: 42,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "auth", "token": "t0k", "userId": 42})
        );
    }

    #[test]
    fn test_data_as_typed_payload() {
        #[derive(Deserialize)]
        struct Notification {
            id: u64,
            title: String,
        }

        let event = InboundEvent::new("notification", json!({"id": 9, "title": "Quiz graded"}));
        let n: Notification = event.data_as().unwrap();
        assert_eq!(n.id, 9);
        assert_eq!(n.title, "Quiz graded");
        assert!(event.is("notification"));
        assert!(!event.is("auth_error"));
    }
}
