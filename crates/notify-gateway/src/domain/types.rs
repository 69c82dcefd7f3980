//! Request and response bodies of the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST send-product-info`.
///
/// Every field defaults to empty so a missing one surfaces as the matching
/// validation error instead of a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductInfoRequest {
    pub product_name: String,
    pub description: String,
    pub phone: String,
    pub email: String,
    /// URL, data URI or bare base64
    pub image_data: String,
    /// Template name; the configured default when absent
    pub template_context: Option<String>,
}

/// Proof that the handle accepted a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub message_id: String,
    /// Canonical network identifier the message went to
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
}

/// Success body of `POST send-product-info`
#[derive(Debug, Clone, Serialize)]
pub struct SendResponse {
    pub success: bool,
    #[serde(flatten)]
    pub receipt: DeliveryReceipt,
}

impl From<DeliveryReceipt> for SendResponse {
    fn from(receipt: DeliveryReceipt) -> Self {
        Self {
            success: true,
            receipt,
        }
    }
}

/// Success body of lifecycle routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}
