use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use debug_relay::config::{
    BackendLayer, ConfigEventKind, ConfigLayer, ConfigSources, load_config,
};
use debug_relay::{RelayHost, SessionOutcome, fatal};
use log::{error, info, warn};
use tokio::net::TcpListener;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

/// A Debug Adapter Protocol relay that bootstraps a debug backend and
/// splices the client onto it
#[derive(Parser)]
#[command(name = "debug-relay")]
#[command(version)]
#[command(about = "A Debug Adapter Protocol relay between an IDE and a debug backend")]
struct Cli {
    /// Serve DAP over TCP on this port instead of stdio
    #[arg(long, value_name = "PORT")]
    server: Option<u16>,

    /// Address to bind in server mode
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1")]
    host: String,

    /// Configuration file layered over the user config
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Backend command for launch sessions; `{host}` and `{port}` are substituted
    #[arg(last = true, value_name = "BACKEND")]
    backend: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> Option<ConfigLayer> {
        let (command, args) = self.backend.split_first()?;
        Some(ConfigLayer {
            shutdown: None,
            backend: Some(BackendLayer {
                command: Some(command.clone()),
                args: Some(args.to_vec()),
                ..Default::default()
            }),
        })
    }
}

fn init_logging(log_file: Option<&Path>) -> std::io::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        // Stdout carries DAP in stdio mode
        None => {
            builder.target(env_logger::Target::Stderr);
        }
    }
    builder.init();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_file.as_deref()) {
        eprintln!("Error: cannot open log file: {}", e);
        return ExitCode::FAILURE;
    }
    fatal::install_panic_hook();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Cannot start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(run(cli));
    // A pending stdin read holds a blocking thread until input arrives
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    code
}

async fn run(cli: Cli) -> ExitCode {
    let outcome = load_config(&ConfigSources {
        explicit_file: cli.config.clone(),
        overrides: cli.overrides(),
        ..ConfigSources::with_user_config()
    });
    for event in &outcome.events {
        match event.kind {
            ConfigEventKind::Info => info!(target: "debug_relay::config", "{}", event.message),
            ConfigEventKind::Warning => warn!(target: "debug_relay::config", "{}", event.message),
        }
    }

    let host = RelayHost::new(outcome.config);

    match cli.server {
        Some(port) => {
            let listener = match TcpListener::bind((cli.host.as_str(), port)).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Cannot listen on {}:{}: {}", cli.host, port, e);
                    return ExitCode::FAILURE;
                }
            };
            match host.serve(listener).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("Server stopped: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        None => match host.run_stdio().await {
            SessionOutcome::ProtocolError => ExitCode::FAILURE,
            SessionOutcome::Terminated | SessionOutcome::Restart => ExitCode::SUCCESS,
        },
    }
}
