//! Messages exchanged with the `dispatch-bridge` helper process.
//!
//! The protocol is JSON-over-stdio: one JSON object per line in each
//! direction. Every request carries an id which the response echoes.

use serde::{Deserialize, Serialize};

use crate::{Handle, StatusCode, WireValue};

/// A command sent from the client to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Monotonically increasing request ID for correlating responses.
    pub id: u64,
    /// The command to execute.
    #[serde(flatten)]
    pub command: Command,
}

/// Commands the client can send to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum Command {
    /// Initialize the automation runtime on the bridge's thread.
    Init,

    /// Instantiate (or attach to) a server by its program id. Returns a handle.
    Create { prog_id: String },

    /// Read a property, optionally indexed by `args`.
    Get {
        target: Handle,
        member: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<WireValue>,
    },

    /// Write a property, optionally indexed by `args`.
    Put {
        target: Handle,
        member: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<WireValue>,
        value: WireValue,
    },

    /// Invoke a method with positional arguments in natural order.
    Call {
        target: Handle,
        member: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<WireValue>,
    },

    /// Drop the bridge's reference to an object.
    Release { handle: Handle },

    /// Release every object, uninitialize, and exit.
    Shutdown,
}

/// A response sent from the bridge back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The request ID this response corresponds to.
    pub id: u64,
    #[serde(flatten)]
    pub result: ResponseResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ResponseResult {
    #[serde(rename = "ok")]
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<ResponseData>,
    },
    #[serde(rename = "error")]
    Error { code: StatusCode, message: String },
}

/// Data returned in successful responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    /// Handle to a newly created server object.
    Handle { handle: Handle },
    /// A property value or method result.
    Value { value: WireValue },
}

impl Response {
    pub fn ok(id: u64, data: Option<ResponseData>) -> Self {
        Self {
            id,
            result: ResponseResult::Ok { data },
        }
    }

    pub fn error(id: u64, code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            id,
            result: ResponseResult::Error {
                code,
                message: message.into(),
            },
        }
    }
}
