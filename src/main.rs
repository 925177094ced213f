use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use serial_bridge::serial::{Discovery, UsbId};
use serial_bridge::{BridgeConfig, ConnectionState, DeviceManager, Responder};

/// Talk to a JSON-over-serial microcontroller module
#[derive(Parser, Debug)]
#[command(name = "serial-bridge", version, about, long_about = None)]
struct Args {
    /// JSON config file (missing fields take defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port path; `virtual` simulates, `virtual-sim` talks to the built-in responder
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Read timeout in milliseconds
    #[arg(long, global = true)]
    read_timeout_ms: Option<u64>,

    /// VID:PID filter for discovery (hex, repeatable)
    #[arg(long = "filter", global = true)]
    filters: Vec<UsbId>,

    /// Enable verbose logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports matching the filter
    Discover,
    /// Send one command and print the response
    Send {
        /// Command name, e.g. STATUS
        name: String,
        /// Parameters as key=value; values that parse as JSON are sent as JSON
        params: Vec<String>,
    },
    /// Act as the device: answer commands on stdin/stdout
    Serve,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .target(env_logger::Target::Stderr)
        .init();

    match &args.command {
        Command::Serve => {
            log::info!("Serving responder on stdin/stdout");
            let stdin = io::stdin();
            Responder::default().serve(stdin.lock(), io::stdout().lock())?;
            Ok(())
        }
        Command::Discover => {
            let config = load_config(&args)?;
            let ports: Vec<_> = Discovery::new(config.vid_pid_filter.clone()).discover()?.collect();
            println!("{}", serde_json::to_string_pretty(&ports)?);
            Ok(())
        }
        Command::Send { name, params } => {
            let config = load_config(&args)?;
            let params = parse_params(params)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(send(config, name, params))
        }
    }
}

async fn send(config: BridgeConfig, name: &str, params: Map<String, Value>) -> Result<()> {
    let module = DeviceManager::build(config).await;
    if let ConnectionState::Error(message) = module.status().await {
        module.cleanup().await;
        anyhow::bail!("module failed to connect: {}", message);
    }

    let result = module.send_command(name, Value::Object(params)).await;
    module.cleanup().await;

    let response = result.context("command failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(port) = &args.port {
        config.port = Some(port.clone());
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(timeout) = args.read_timeout_ms {
        config.read_timeout_ms = timeout;
    }
    if !args.filters.is_empty() {
        config.vid_pid_filter = args.filters.clone();
    }
    Ok(config)
}

fn parse_params(params: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for param in params {
        let (key, raw) = param
            .split_once('=')
            .with_context(|| format!("expected key=value, got '{}'", param))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}
