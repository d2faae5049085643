//! HRESULT-style status codes returned by automation calls.

use serde::{Deserialize, Serialize};

/// A 32-bit status code as reported by the automation ABI.
///
/// Negative values (high bit set) are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const fn from_u32(raw: u32) -> Self {
        StatusCode(raw as i32)
    }

    pub fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Symbolic name for the well-known codes.
    pub fn name(self) -> Option<&'static str> {
        KNOWN.iter().find(|(code, _)| *code == self).map(|(_, name)| *name)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "0x{:08X} ({name})", self.0 as u32),
            None => write!(f, "0x{:08X}", self.0 as u32),
        }
    }
}

pub const S_OK: StatusCode = StatusCode(0);
pub const E_FAIL: StatusCode = StatusCode::from_u32(0x8000_4005);
pub const E_INVALIDARG: StatusCode = StatusCode::from_u32(0x8007_0057);
pub const E_HANDLE: StatusCode = StatusCode::from_u32(0x8007_0006);

pub const DISP_E_UNKNOWNINTERFACE: StatusCode = StatusCode::from_u32(0x8002_0001);
pub const DISP_E_MEMBERNOTFOUND: StatusCode = StatusCode::from_u32(0x8002_0003);
pub const DISP_E_PARAMNOTFOUND: StatusCode = StatusCode::from_u32(0x8002_0004);
pub const DISP_E_TYPEMISMATCH: StatusCode = StatusCode::from_u32(0x8002_0005);
pub const DISP_E_UNKNOWNNAME: StatusCode = StatusCode::from_u32(0x8002_0006);
pub const DISP_E_EXCEPTION: StatusCode = StatusCode::from_u32(0x8002_0009);
pub const DISP_E_OVERFLOW: StatusCode = StatusCode::from_u32(0x8002_000A);
pub const DISP_E_BADINDEX: StatusCode = StatusCode::from_u32(0x8002_000B);
pub const DISP_E_BADPARAMCOUNT: StatusCode = StatusCode::from_u32(0x8002_000E);

pub const RPC_E_CALL_REJECTED: StatusCode = StatusCode::from_u32(0x8001_0001);
pub const RPC_E_DISCONNECTED: StatusCode = StatusCode::from_u32(0x8001_0108);
pub const RPC_E_SERVERCALL_RETRYLATER: StatusCode = StatusCode::from_u32(0x8001_010A);
pub const RPC_S_SERVER_UNAVAILABLE: StatusCode = StatusCode::from_u32(0x8007_06BA);
pub const RPC_S_CALL_FAILED: StatusCode = StatusCode::from_u32(0x8007_06BE);

pub const CO_E_CLASSSTRING: StatusCode = StatusCode::from_u32(0x8004_01F3);
pub const CO_E_OBJNOTCONNECTED: StatusCode = StatusCode::from_u32(0x8004_01FD);
pub const REGDB_E_CLASSNOTREG: StatusCode = StatusCode::from_u32(0x8004_0154);

/// Raised by the spreadsheet server while it is in edit mode or showing a
/// modal dialog.
pub const VBA_E_IGNORE: StatusCode = StatusCode::from_u32(0x800A_C472);

const KNOWN: &[(StatusCode, &str)] = &[
    (S_OK, "S_OK"),
    (E_FAIL, "E_FAIL"),
    (E_INVALIDARG, "E_INVALIDARG"),
    (E_HANDLE, "E_HANDLE"),
    (DISP_E_UNKNOWNINTERFACE, "DISP_E_UNKNOWNINTERFACE"),
    (DISP_E_MEMBERNOTFOUND, "DISP_E_MEMBERNOTFOUND"),
    (DISP_E_PARAMNOTFOUND, "DISP_E_PARAMNOTFOUND"),
    (DISP_E_TYPEMISMATCH, "DISP_E_TYPEMISMATCH"),
    (DISP_E_UNKNOWNNAME, "DISP_E_UNKNOWNNAME"),
    (DISP_E_EXCEPTION, "DISP_E_EXCEPTION"),
    (DISP_E_OVERFLOW, "DISP_E_OVERFLOW"),
    (DISP_E_BADINDEX, "DISP_E_BADINDEX"),
    (DISP_E_BADPARAMCOUNT, "DISP_E_BADPARAMCOUNT"),
    (RPC_E_CALL_REJECTED, "RPC_E_CALL_REJECTED"),
    (RPC_E_DISCONNECTED, "RPC_E_DISCONNECTED"),
    (RPC_E_SERVERCALL_RETRYLATER, "RPC_E_SERVERCALL_RETRYLATER"),
    (RPC_S_SERVER_UNAVAILABLE, "RPC_S_SERVER_UNAVAILABLE"),
    (RPC_S_CALL_FAILED, "RPC_S_CALL_FAILED"),
    (CO_E_CLASSSTRING, "CO_E_CLASSSTRING"),
    (CO_E_OBJNOTCONNECTED, "CO_E_OBJNOTCONNECTED"),
    (REGDB_E_CLASSNOTREG, "REGDB_E_CLASSNOTREG"),
    (VBA_E_IGNORE, "VBA_E_IGNORE"),
];
