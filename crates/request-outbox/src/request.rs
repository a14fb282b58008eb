//! Request descriptors held by the queue and passed to executors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a queued request.
///
/// Uniqueness is not enforced: enqueuing an id that is already queued appends
/// a second entry, and `dequeue_by_id` removes both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wrap an existing identifier.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::from_string(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Call parameters for a queued request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Absolute URL of the remote endpoint.
    pub url: String,
    /// HTTP method, e.g. `POST`.
    pub method: String,
    /// JSON body, omitted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// A request waiting in the queue for (re-)execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    /// Identifier used for dequeueing.
    pub id: RequestId,
    /// Request kind; outcome events are named after it.
    pub base_type: String,
    /// What to send.
    #[serde(flatten)]
    pub descriptor: RequestDescriptor,
}

impl PendingRequest {
    pub fn new(
        id: impl Into<RequestId>,
        base_type: impl Into<String>,
        descriptor: RequestDescriptor,
    ) -> Self {
        Self {
            id: id.into(),
            base_type: base_type.into(),
            descriptor,
        }
    }
}

/// An ad-hoc request for the direct executor.
///
/// `params` is handed verbatim to the caller-supplied call function.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectRequest<P> {
    pub base_type: String,
    pub params: P,
}

impl<P> DirectRequest<P> {
    pub fn new(base_type: impl Into<String>, params: P) -> Self {
        Self {
            base_type: base_type.into(),
            params,
        }
    }
}
