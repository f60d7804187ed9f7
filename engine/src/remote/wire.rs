//! Wire contract shared by [`super::HttpRemote`] and stash-server.
//!
//! Routes (relative to the endpoint):
//! - `GET    /collections/{name}/items[?owner_id=..]` - newest first
//! - `POST   /collections/{name}/items`
//! - `PUT    /collections/{name}/items/{id}`
//! - `DELETE /collections/{name}/items/{id}` - missing rows succeed
//! - `GET    /collections/{name}/changes` - websocket; one JSON
//!   [`ChangeNotice`] text message per write

use crate::error::RemoteError;
use serde::{Deserialize, Serialize};

/// Query parameter carrying the owner filter on fetch.
pub const OWNER_QUERY: &str = "owner_id";

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The payload named a column the collection does not have
    UnknownField,
    NotFound,
    BadRequest,
    Unauthorized,
    Internal,
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description
    pub error: String,
    pub code: ErrorCode,
    /// Offending column for [`ErrorCode::UnknownField`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
            field: None,
        }
    }

    pub fn unknown_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            error: format!("collection has no column '{field}'"),
            code: ErrorCode::UnknownField,
            field: Some(field),
        }
    }
}

/// Kind of write announced on the change channel. Informational only:
/// clients treat every event as "refetch".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Notices were dropped for a slow socket
    Resync,
}

/// Message sent on the change socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub collection: String,
    pub kind: ChangeKind,
}

/// Turn a non-success response into a [`RemoteError`].
///
/// `target` is the item id for single-row calls. Unavailability (5xx, 408,
/// 429) and authentication failures count as network errors; other client
/// errors as query errors.
pub fn classify(status: u16, body: Option<ErrorBody>, target: Option<&str>) -> RemoteError {
    let message = body
        .as_ref()
        .map(|b| b.error.clone())
        .unwrap_or_else(|| format!("status {status}"));

    if let Some(ErrorBody {
        code: ErrorCode::UnknownField,
        field: Some(field),
        ..
    }) = body
    {
        return RemoteError::Schema { field };
    }

    match (status, target) {
        (404, Some(id)) => RemoteError::NotFound(id.to_string()),
        (401 | 403 | 408 | 429, _) | (500..=599, _) => RemoteError::Network(message),
        _ => RemoteError::Query(message),
    }
}
