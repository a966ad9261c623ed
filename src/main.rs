//! selector-router: outbound selector groups with file-backed providers
//!
//! Loads the configuration, starts providers and selectors, and keeps them
//! running (reloading provider files as they change) until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration path
//! ./selector-router
//!
//! # Run with a custom configuration
//! ./selector-router -c /path/to/config.json
//!
//! # Run with environment overrides
//! SELECTOR_ROUTER_LOG_LEVEL=debug ./selector-router
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use selector_router::config::{create_default_config, load_config_with_env, Config};
use selector_router::Router;

/// Interval between selector status lines
const STATUS_INTERVAL: Duration = Duration::from_secs(300);

/// Command-line arguments
struct Args {
    config_path: PathBuf,
    generate_config: bool,
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/selector-router/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => generate_config = true,
                "--check" => check_config = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("selector-router v{}", selector_router::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"selector-router v{}

Outbound selector groups with file-backed providers and persisted selection.

USAGE:
    selector-router [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/selector-router/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    SELECTOR_ROUTER_LOG_LEVEL    Override log level (trace, debug, info, warn, error)
    SELECTOR_ROUTER_CACHE_FILE   Override persisted selection file
    SELECTOR_ROUTER_BASE_DIR     Override base directory for provider paths
"#,
        selector_router::VERSION
    );
}

fn init_logging(config: &Config) -> Result<()> {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("notify=warn".parse()?);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    let args = Args::parse();

    if args.generate_config {
        create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).with_context(|| {
        format!("Failed to load configuration from {:?}", args.config_path)
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config)?;

    info!("selector-router v{}", selector_router::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let router = Router::new(&config).context("Failed to build router")?;
    router.start().context("Failed to start router")?;

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );
    router.log_status();

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;
    loop {
        tokio::select! {
            _ = status.tick() => router.log_status(),
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, initiating shutdown...");
                break;
            }
            () = wait_for_sigterm() => {
                info!("Received SIGTERM, initiating shutdown...");
                break;
            }
        }
    }

    router.log_status();
    router.close();
    info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
