//! Proxy configuration.
//!
//! Everything here has a sensible `Default`; a JSON document may override any
//! subset of fields. Status codes in the JSON form may be written either as
//! integers or as hex strings (`"0x8001010A"`).

use std::path::Path;

use dispatch_protocol::{status, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

/// How a failed call affects the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Only this call failed (unknown member, bad argument shape).
    Recoverable,
    /// The server is busy or rejected the call; re-issuing it may succeed.
    Transient,
    /// The object or the server is gone; the session must be re-established.
    Fatal,
}

/// Maps status codes to a [`FailureClass`].
///
/// Lists are checked in the order fatal, transient, recoverable; a code in
/// none of them gets `unlisted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureClassifier {
    #[serde(with = "code_list")]
    pub recoverable: Vec<StatusCode>,
    #[serde(with = "code_list")]
    pub transient: Vec<StatusCode>,
    #[serde(with = "code_list")]
    pub fatal: Vec<StatusCode>,
    pub unlisted: FailureClass,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self {
            recoverable: vec![
                status::DISP_E_UNKNOWNNAME,
                status::DISP_E_MEMBERNOTFOUND,
                status::DISP_E_PARAMNOTFOUND,
                status::DISP_E_BADPARAMCOUNT,
                status::DISP_E_TYPEMISMATCH,
                status::DISP_E_BADINDEX,
                status::DISP_E_OVERFLOW,
                status::E_INVALIDARG,
            ],
            transient: vec![
                status::RPC_E_CALL_REJECTED,
                status::RPC_E_SERVERCALL_RETRYLATER,
                status::VBA_E_IGNORE,
                status::DISP_E_EXCEPTION,
            ],
            fatal: vec![
                status::RPC_E_DISCONNECTED,
                status::RPC_S_SERVER_UNAVAILABLE,
                status::RPC_S_CALL_FAILED,
                status::CO_E_OBJNOTCONNECTED,
                status::E_HANDLE,
            ],
            unlisted: FailureClass::Fatal,
        }
    }
}

impl FailureClassifier {
    pub fn classify(&self, code: StatusCode) -> FailureClass {
        if self.fatal.contains(&code) {
            FailureClass::Fatal
        } else if self.transient.contains(&code) {
            FailureClass::Transient
        } else if self.recoverable.contains(&code) {
            FailureClass::Recoverable
        } else {
            self.unlisted
        }
    }
}

/// Configuration for an [`AutomationProxy`](crate::AutomationProxy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Run every automation call on a dedicated worker thread that owns the
    /// server connection. When false, calls run on the caller's thread.
    pub use_worker: bool,

    /// Log failed calls at `warn` level.
    pub log_errors: bool,

    /// Thread name for the worker.
    pub worker_name: String,

    /// Status code classification.
    pub classification: FailureClassifier,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            use_worker: true,
            log_errors: true,
            worker_name: "automation-worker".to_string(),
            classification: FailureClassifier::default(),
        }
    }
}

impl ProxyConfig {
    /// Calls run on the caller's thread.
    pub fn inline() -> Self {
        Self {
            use_worker: false,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ProxyError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ProxyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }
}

mod code_list {
    use dispatch_protocol::StatusCode;
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(codes: &[StatusCode], ser: S) -> Result<S::Ok, S::Error> {
        codes
            .iter()
            .map(|c| format!("0x{:08X}", c.0 as u32))
            .collect::<Vec<_>>()
            .serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<StatusCode>, D::Error> {
        Vec::<Repr>::deserialize(de)?
            .into_iter()
            .map(|repr| match repr {
                Repr::Int(n) => i32::try_from(n)
                    .or_else(|_| u32::try_from(n).map(|u| u as i32))
                    .map(StatusCode)
                    .map_err(|_| de::Error::custom(format!("status code {n} out of range"))),
                Repr::Text(s) => {
                    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
                    u32::from_str_radix(digits, 16)
                        .map(StatusCode::from_u32)
                        .map_err(|_| de::Error::custom(format!("invalid status code '{s}'")))
                }
            })
            .collect()
    }
}
