//! Notification payloads the hub inspects.

use serde::{Deserialize, Serialize};

use super::core::RequestId;
use super::ProgressToken;

/// Parameters of `notifications/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    /// Token correlating the update with its originating call
    pub progress_token: ProgressToken,

    /// Progress so far
    pub progress: f64,

    /// Total amount of work, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,

    /// Optional status message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Parameters of `notifications/cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    /// Id of the request being cancelled
    pub request_id: RequestId,

    /// Optional reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of the hub's own `notifications/tools/list_changed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListChangedParams {
    /// Registry revision after the mutation
    pub revision: u64,

    /// Canonical registry digest after the mutation
    pub hash: String,
}
