//! Subprocess management and JSON IPC for the `dispatch-bridge` helper.
//!
//! The bridge is a Windows executable that hosts real `IDispatch` objects.
//! On Windows it is started directly; elsewhere it runs under WINE. Requests
//! and responses are single JSON lines on the child's stdin/stdout.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Stdio};

use dispatch_protocol::{
    status, Command as BridgeCommand, Handle, Request, Response, ResponseData, ResponseResult,
    StatusCode, WireValue,
};
use serde::{Deserialize, Serialize};

use super::AutomationServer;
use crate::error::ServerError;

/// Errors from the bridge process.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to spawn bridge process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Bridge process not running")]
    NotRunning,

    #[error("Failed to send command to bridge: {0}")]
    SendFailed(String),

    #[error("Failed to read response from bridge: {0}")]
    ReadFailed(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{message} ({code})")]
    Remote { code: StatusCode, message: String },

    #[error("Unexpected response data")]
    UnexpectedResponse,

    #[error("WINE not found. Install WINE and ensure 'wine' is in PATH.")]
    WineNotFound,

    #[error("Bridge executable not found at: {0}")]
    BridgeExeNotFound(String),
}

impl From<BridgeError> for ServerError {
    fn from(e: BridgeError) -> Self {
        let code = match &e {
            BridgeError::Remote { code, .. } => *code,
            BridgeError::SpawnFailed(_)
            | BridgeError::WineNotFound
            | BridgeError::BridgeExeNotFound(_) => status::RPC_S_SERVER_UNAVAILABLE,
            BridgeError::NotRunning | BridgeError::SendFailed(_) | BridgeError::ReadFailed(_) => {
                status::RPC_E_DISCONNECTED
            }
            BridgeError::JsonError(_) | BridgeError::UnexpectedResponse => {
                status::RPC_S_CALL_FAILED
            }
        };
        match e {
            BridgeError::Remote { message, .. } => ServerError::new(code, message),
            other => ServerError::new(code, other.to_string()),
        }
    }
}

/// Configuration for the bridge process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Path to `dispatch-bridge.exe`. If None, common locations relative to
    /// the current binary are searched.
    pub bridge_exe_path: Option<PathBuf>,

    /// WINE executable used to run the bridge. None runs it directly, which
    /// is the default on Windows.
    pub wine_path: Option<PathBuf>,

    /// Optional WINEPREFIX (for isolating the WINE environment).
    pub wine_prefix: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge_exe_path: None,
            wine_path: (!cfg!(windows)).then(|| PathBuf::from("wine")),
            wine_prefix: None,
        }
    }
}

/// [`AutomationServer`] backed by the bridge process.
pub struct BridgeServer {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    shut_down: bool,
}

impl BridgeServer {
    /// Start the bridge process and initialize its automation runtime.
    pub fn start(config: BridgeConfig) -> Result<Self, BridgeError> {
        let exe_path = config.bridge_exe_path.unwrap_or_else(find_bridge_exe);

        if !exe_path.exists() {
            return Err(BridgeError::BridgeExeNotFound(
                exe_path.display().to_string(),
            ));
        }

        let mut cmd = match &config.wine_path {
            Some(wine) => {
                let mut cmd = std::process::Command::new(wine);
                if let Some(prefix) = &config.wine_prefix {
                    cmd.env("WINEPREFIX", prefix);
                }
                cmd.arg(&exe_path);
                cmd
            }
            None => std::process::Command::new(&exe_path),
        };
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit()); // Bridge diagnostics go to our stderr

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound && config.wine_path.is_some() {
                BridgeError::WineNotFound
            } else {
                BridgeError::SpawnFailed(e)
            }
        })?;
        tracing::debug!(exe = %exe_path.display(), pid = child.id(), "bridge process started");

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(BridgeError::NotRunning);
        };

        let mut bridge = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
            shut_down: false,
        };

        bridge.send_command(BridgeCommand::Init)?;

        Ok(bridge)
    }

    /// Send a command to the bridge and wait for the response.
    fn send_command(&mut self, command: BridgeCommand) -> Result<Option<ResponseData>, BridgeError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = Request { id, command };
        let json = serde_json::to_string(&request)?;

        writeln!(self.stdin, "{json}").map_err(|e| BridgeError::SendFailed(e.to_string()))?;
        self.stdin
            .flush()
            .map_err(|e| BridgeError::SendFailed(e.to_string()))?;

        let mut line = String::new();
        self.stdout
            .read_line(&mut line)
            .map_err(|e| BridgeError::ReadFailed(e.to_string()))?;
        if line.is_empty() {
            return Err(BridgeError::NotRunning);
        }

        let response: Response = serde_json::from_str(&line)?;
        if response.id != id {
            return Err(BridgeError::UnexpectedResponse);
        }
        match response.result {
            ResponseResult::Ok { data } => Ok(data),
            ResponseResult::Error { code, message } => Err(BridgeError::Remote { code, message }),
        }
    }

    fn expect_value(data: Option<ResponseData>) -> Result<WireValue, BridgeError> {
        match data {
            Some(ResponseData::Value { value }) => Ok(value),
            None => Ok(WireValue::Empty),
            Some(_) => Err(BridgeError::UnexpectedResponse),
        }
    }
}

impl AutomationServer for BridgeServer {
    fn create(&mut self, name: &str) -> Result<Handle, ServerError> {
        let data = self.send_command(BridgeCommand::Create {
            prog_id: name.to_string(),
        })?;
        match data {
            Some(ResponseData::Handle { handle }) => Ok(handle),
            _ => Err(BridgeError::UnexpectedResponse.into()),
        }
    }

    fn get(&mut self, target: Handle, member: &str, args: &[WireValue]) -> Result<WireValue, ServerError> {
        let data = self.send_command(BridgeCommand::Get {
            target,
            member: member.to_string(),
            args: args.to_vec(),
        })?;
        Ok(Self::expect_value(data)?)
    }

    fn put(
        &mut self,
        target: Handle,
        member: &str,
        args: &[WireValue],
        value: WireValue,
    ) -> Result<(), ServerError> {
        self.send_command(BridgeCommand::Put {
            target,
            member: member.to_string(),
            args: args.to_vec(),
            value,
        })?;
        Ok(())
    }

    fn call(&mut self, target: Handle, member: &str, args: &[WireValue]) -> Result<WireValue, ServerError> {
        let data = self.send_command(BridgeCommand::Call {
            target,
            member: member.to_string(),
            args: args.to_vec(),
        })?;
        Ok(Self::expect_value(data)?)
    }

    fn release(&mut self, handle: Handle) -> Result<(), ServerError> {
        self.send_command(BridgeCommand::Release { handle })?;
        Ok(())
    }

    /// Shut down the bridge: release its objects, uninitialize, and wait
    /// for the process to exit.
    fn shutdown(&mut self) {
        if std::mem::replace(&mut self.shut_down, true) {
            return;
        }
        if let Err(e) = self.send_command(BridgeCommand::Shutdown) {
            tracing::warn!(error = %e, "bridge did not acknowledge shutdown");
        }
        match self.child.wait() {
            Ok(exit) => tracing::debug!(%exit, "bridge process exited"),
            Err(e) => tracing::warn!(error = %e, "failed to wait for bridge process"),
        }
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        if !self.shut_down {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Attempt to locate the bridge exe relative to the current executable or in common paths.
fn find_bridge_exe() -> PathBuf {
    // Check next to the current executable
    if let Ok(mut exe) = std::env::current_exe() {
        exe.pop();
        let candidate = exe.join("dispatch-bridge.exe");
        if candidate.exists() {
            return candidate;
        }
    }

    // Check in the target directory (for development)
    for profile in ["release", "debug"] {
        let candidate = PathBuf::from(format!(
            "target/x86_64-pc-windows-gnu/{profile}/dispatch-bridge.exe"
        ));
        if candidate.exists() {
            return candidate;
        }
    }

    PathBuf::from("dispatch-bridge.exe")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_exe_is_reported() {
        let config = BridgeConfig {
            bridge_exe_path: Some(PathBuf::from("/nonexistent/dispatch-bridge.exe")),
            ..BridgeConfig::default()
        };
        let err = BridgeServer::start(config).err().unwrap();
        assert!(matches!(err, BridgeError::BridgeExeNotFound(_)));
        let server: ServerError = err.into();
        assert_eq!(server.code, status::RPC_S_SERVER_UNAVAILABLE);
    }

    #[test]
    fn test_remote_error_keeps_code() {
        let err = BridgeError::Remote {
            code: status::RPC_E_CALL_REJECTED,
            message: "Call was rejected by callee.".into(),
        };
        let server: ServerError = err.into();
        assert_eq!(server.code, status::RPC_E_CALL_REJECTED);
        assert_eq!(server.message, "Call was rejected by callee.");
    }

    #[test]
    fn test_config_from_json() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"wine_prefix": "/tmp/wine"}"#).unwrap();
        assert_eq!(config.wine_prefix, Some(PathBuf::from("/tmp/wine")));
        assert_eq!(config.wine_path, BridgeConfig::default().wine_path);
    }
}
