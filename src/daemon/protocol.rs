//! Wire protocol — request/response envelopes for client-service
//! communication. One JSON object per line in each direction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::error;

/// Request from client to service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    /// Method parameters; an absent `params` means no parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Request {
            method: method.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Response from service to client, tagged by `status`.
///
/// Besides the success/error pair, `get_status` reports the service state
/// directly through the two status forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Successful call; method-specific fields sit beside the tag.
    Success {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },

    /// Failed call.
    Error { message: String },

    /// `get_status` report while an engine is active.
    Initialized {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },

    /// `get_status` report before `initialize` has succeeded.
    NotInitialized { message: String },
}

impl Response {
    pub fn success<T: Serialize>(payload: T) -> Self {
        Response::Success {
            fields: to_fields(payload),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error {
            message: msg.into(),
        }
    }

    pub fn initialized<T: Serialize>(payload: T) -> Self {
        Response::Initialized {
            fields: to_fields(payload),
        }
    }

    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Response::NotInitialized {
            message: msg.into(),
        }
    }
}

fn to_fields<T: Serialize>(payload: T) -> Map<String, Value> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            // Non-object payloads go under a "data" key.
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
        Err(_) => Map::new(),
    }
}

/// Decode one request line. Fails on non-JSON input, a non-object, or a
/// missing or ill-typed `method`.
pub fn decode_request(line: &str) -> serde_json::Result<Request> {
    serde_json::from_str(line)
}

/// Encode a response as a single JSON line (without the trailing
/// newline). Total: a serialization failure degrades to a hand-built
/// error envelope so the one-reply discipline holds even then.
pub fn encode_response(response: &Response) -> String {
    match serde_json::to_string(response) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "response serialization failed");
            r#"{"status":"error","message":"Server error: response serialization failed"}"#
                .to_string()
        }
    }
}
