//! duke-ax - drive an automation server by member path

mod logging;
mod script;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use duke_automation::server::{self, BridgeConfig, BridgeServer, MemoryServer, ServerFactory};
use duke_automation::{AutomationProxy, CallError, Handle, ProxyConfig};

use script::{parse_value, Step};

/// Pause before the n-th re-issue of a rejected call is `n` times this.
const RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "duke-ax")]
#[command(
    author,
    version,
    about = "Get, set, and invoke members of an automation server"
)]
struct Cli {
    /// Server object to instantiate
    #[arg(short, long, global = true, default_value = "Excel.Application")]
    server: String,

    /// Where the server objects live
    #[arg(short, long, global = true, value_enum, default_value_t = Backend::Bridge)]
    backend: Backend,

    /// Path to dispatch-bridge.exe (default: search next to this binary)
    #[arg(long, global = true)]
    bridge_exe: Option<PathBuf>,

    /// Run calls on the main thread instead of a worker thread
    #[arg(long, global = true)]
    inline: bool,

    /// Proxy configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Re-issue a call up to N times while the server rejects it as busy
    #[arg(short, long, global = true, default_value = "0")]
    retries: u32,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    /// dispatch-bridge.exe, under WINE on non-Windows hosts
    Bridge,
    /// In-process demo spreadsheet
    Memory,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a property and print its value
    Get {
        /// Member path, e.g. 'ActiveSheet.Range("A1").Value'
        path: String,
    },

    /// Write a property
    Set {
        /// Member path
        path: String,

        /// Value: a literal (42, 1.5, "text", True) or bare text
        value: String,
    },

    /// Invoke a method and print its result
    Call {
        /// Method path, e.g. 'ActiveWorkbook.SaveAs'
        path: String,

        /// Positional arguments (at most 8, including any in the path)
        args: Vec<String>,
    },

    /// Resolve a path to an object and print its handle
    Resolve {
        /// Member path
        path: String,
    },

    /// Run a script of get/set/call/resolve/clear lines
    Run {
        /// Script file ('-' for stdin)
        script: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let steps = match &cli.command {
        Commands::Get { path } => vec![Step::Get { path: path.clone() }],
        Commands::Set { path, value } => vec![Step::Set {
            path: path.clone(),
            value: parse_value(value),
        }],
        Commands::Call { path, args } => vec![Step::Call {
            path: path.clone(),
            args: args.iter().map(|a| parse_value(a)).collect(),
        }],
        Commands::Resolve { path } => vec![Step::Resolve { path: path.clone() }],
        Commands::Run { script } => script::parse(&read_script(script)?)
            .with_context(|| format!("Failed to parse '{}'", script.display()))?,
    };

    let config = proxy_config(&cli)?;
    let proxy = AutomationProxy::launch(&cli.server, server_factory(&cli), config)
        .with_context(|| format!("Failed to connect to '{}'", cli.server))?;

    for step in &steps {
        if let Some(output) = run_step(&proxy, step, cli.retries)? {
            println!("{output}");
        }
    }

    let report = proxy.disconnect();
    if report.failed > 0 {
        eprintln!(
            "Warning: {} of {} objects could not be released",
            report.failed,
            report.failed + report.released
        );
    }
    Ok(())
}

fn read_script(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        return std::io::read_to_string(std::io::stdin()).context("Failed to read stdin");
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path.display()))
}

fn proxy_config(cli: &Cli) -> Result<ProxyConfig> {
    let mut config = match &cli.config {
        Some(path) => ProxyConfig::from_path(path)?,
        None => ProxyConfig::default(),
    };
    if cli.inline {
        config.use_worker = false;
    }
    Ok(config)
}

fn server_factory(cli: &Cli) -> ServerFactory {
    match cli.backend {
        Backend::Memory => server::factory(|| Ok(MemoryServer::spreadsheet())),
        Backend::Bridge => {
            let config = BridgeConfig {
                bridge_exe_path: cli.bridge_exe.clone(),
                ..BridgeConfig::default()
            };
            server::factory(move || Ok(BridgeServer::start(config)?))
        }
    }
}

fn execute(proxy: &AutomationProxy, step: &Step) -> Result<Option<String>, CallError> {
    let root = Handle::NONE;
    match step {
        Step::Get { path } => proxy
            .get_property(root, path)
            .map(|value| Some(value.to_string())),
        Step::Set { path, value } => proxy
            .try_set_property(root, path, value.clone())
            .map(|()| None),
        Step::Call { path, args } => proxy
            .try_invoke(root, path, args)
            .map(|value| (!value.is_empty()).then(|| value.to_string())),
        Step::Resolve { path } => proxy
            .try_resolve(root, path)
            .map(|handle| Some(handle.to_string())),
        Step::Clear => {
            let released = proxy.clear_bag();
            tracing::info!(released, "object cache cleared");
            Ok(None)
        }
    }
}

/// Run one step. Transient failures are re-issued up to `retries` times;
/// nothing else is.
fn run_step(proxy: &AutomationProxy, step: &Step, retries: u32) -> Result<Option<String>> {
    let mut attempt = 0;
    loop {
        match execute(proxy, step) {
            Ok(output) => return Ok(output),
            Err(e @ CallError::Transient { .. }) if attempt < retries => {
                attempt += 1;
                tracing::info!(attempt, error = %e, "server busy, retrying");
                thread::sleep(RETRY_DELAY * attempt);
            }
            Err(CallError::Aborted) => bail!("operation cancelled"),
            Err(e @ CallError::Fatal { .. }) => {
                return Err(anyhow!(e).context("operation cancelled"));
            }
            Err(e) => return Err(e).with_context(|| format!("'{step}' failed")),
        }
    }
}
