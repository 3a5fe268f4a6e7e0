//! HAP accessory daemon - serves pair-setup and pair-verify over TCP.

mod http;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use hap_core::config::AccessoryConfig;
use hap_pairing::{advertise, FileStore, IdentityStore};
use rand::rngs::OsRng;
use tracing::info;

use server::Server;

/// Command-line arguments
#[derive(Default)]
struct Args {
    /// JSON accessory configuration
    config: Option<PathBuf>,
    /// Overrides the configured port
    port: Option<u16>,
    /// Enable debug logging
    debug: bool,
    /// Write logs here instead of stderr
    log_file: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = iter.next() {
                    args.config = Some(PathBuf::from(path));
                }
            }
            "--port" | "-p" => match iter.next().map(|p| p.parse::<u16>()) {
                Some(Ok(port)) => args.port = Some(port),
                _ => {
                    eprintln!("--port expects a number between 0 and 65535");
                    std::process::exit(1);
                }
            },
            "--debug" | "-d" => {
                args.debug = true;
            }
            "--log-file" | "-l" => {
                if let Some(path) = iter.next() {
                    args.log_file = Some(PathBuf::from(path));
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
    }

    args
}

fn print_help() {
    println!("hap-accessory - HomeKit accessory pairing daemon");
    println!();
    println!("Usage: hap-accessory [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config PATH    Accessory configuration (JSON)");
    println!("  -p, --port PORT      Listen on PORT instead of the configured port");
    println!("  -d, --debug          Enable debug logging");
    println!("  -l, --log-file PATH  Write logs to PATH");
    println!("  -h, --help           Show this help message");
}

fn setup_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let Some(path) = &args.log_file else {
        tracing_subscriber::fmt()
            .with_target(true)
            .with_max_level(level)
            .init();
        return Ok(None);
    };

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating log file {}", path.display()))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_max_level(level)
        .init();

    info!("Logging to {:?}", path);
    Ok(Some(guard))
}

fn load_config(args: &Args) -> Result<AccessoryConfig> {
    let mut config = match &args.config {
        Some(path) => AccessoryConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => AccessoryConfig::builder().build()?,
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    // Setup logging before anything else
    let _guard = setup_logging(&args)?;

    let config = load_config(&args)?;
    info!(label = %config.label, "Starting accessory");

    let store = FileStore::open_or_create(&config.store_path, &config.mac, &mut OsRng)
        .with_context(|| format!("opening identity store {}", config.store_path.display()))?;
    let store: Arc<dyn IdentityStore> = Arc::new(store);
    info!(id = %store.accessory_id(), "Accessory identity loaded");

    let txt = advertise::txt_record(&config, store.as_ref())?;
    let txt = txt
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");
    info!(service = advertise::SERVICE_TYPE, port = config.port, %txt, "Advertisement record");

    let listener = server::bind(config.port).await?;
    let server = Server::new(store, config.setup_code.clone());

    tokio::select! {
        result = server.run(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
