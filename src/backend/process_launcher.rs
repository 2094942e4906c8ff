//! Default launcher: spawns the configured backend command for `launch`
//! requests and connects to remote endpoints for `attach` requests.

use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, trace};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::Instant;

use super::{BackendHandle, BackendKind, BackendLauncher, BackendProcess, BackendSocket};
use crate::config::BackendConfig;
use crate::error::{RelayError, RelayResult};
use crate::protocol::Request;

const DEFAULT_ATTACH_HOST: &str = "127.0.0.1";

pub struct ProcessLauncher {
    config: BackendConfig,
}

impl ProcessLauncher {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    fn launch(&self, request: &Request) -> RelayResult<BackendHandle> {
        let program = self
            .config
            .command
            .as_deref()
            .ok_or_else(|| RelayError::launch("no backend command configured"))?;

        let port = reserve_port(&self.config.host)?;
        let args = self.config.substitute_args(port);

        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(Stdio::null())
            // Stdout may be the DAP channel to the client
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(cwd) = request.argument("cwd").and_then(Value::as_str) {
            command.current_dir(cwd);
        }
        if let Some(env) = request.argument("env").and_then(Value::as_object) {
            for (key, value) in env {
                match value {
                    Value::String(value) => {
                        command.env(key, value);
                    }
                    Value::Null => {
                        command.env_remove(key);
                    }
                    other => {
                        command.env(key, other.to_string());
                    }
                }
            }
        }

        let child = command
            .spawn()
            .map_err(|e| RelayError::launch(format!("failed to spawn {}: {}", program, e)))?;
        let process_id = child.id();

        info!(
            target: "debug_relay::backend",
            "Launched backend {} (pid {:?}) listening on {}:{}",
            program,
            process_id,
            self.config.host,
            port
        );

        let address = format!("{}:{}", self.config.host, port);
        let timeout = self.config.connect_timeout;
        let interval = self.config.connect_retry_interval;
        let socket = Box::pin(async move {
            connect_with_retry(&address, timeout, interval)
                .await
                .map_err(|e| RelayError::launch(format!("backend at {} unreachable: {}", address, e)))
        });

        Ok(BackendHandle::new(
            socket,
            process_id,
            BackendProcess::from_child(child),
        ))
    }

    fn attach(&self, request: &Request) -> RelayResult<BackendHandle> {
        let (host, port) = attach_target(request)?;
        let address = format!("{}:{}", host, port);

        info!(
            target: "debug_relay::backend",
            "Attaching to backend at {}",
            address
        );

        let timeout = self.config.connect_timeout;
        let interval = self.config.connect_retry_interval;
        let socket = Box::pin(async move {
            connect_with_retry(&address, timeout, interval)
                .await
                .map_err(|e| RelayError::attach(address.clone(), e.to_string()))
        });

        Ok(BackendHandle::new(socket, None, BackendProcess::none()))
    }
}

impl BackendLauncher for ProcessLauncher {
    fn start(&self, kind: BackendKind, request: &Request) -> RelayResult<BackendHandle> {
        match kind {
            BackendKind::Launch => self.launch(request),
            BackendKind::Attach => self.attach(request),
        }
    }
}

/// `connect.host`/`connect.port`, falling back to top-level `host`/`port`.
fn attach_target(request: &Request) -> RelayResult<(String, u16)> {
    let connect = request.argument("connect");
    let field = |key: &str| {
        connect
            .and_then(|c| c.get(key))
            .or_else(|| request.argument(key))
    };

    let host = field("host")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_ATTACH_HOST)
        .to_string();

    let port = match field("port") {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.parse::<u16>().ok(),
        _ => None,
    }
    .ok_or_else(|| RelayError::attach(host.clone(), "attach request has no valid port"))?;

    Ok((host, port))
}

/// Ask the OS for a free port on `host`.
fn reserve_port(host: &str) -> RelayResult<u16> {
    let listener = std::net::TcpListener::bind((host, 0))
        .map_err(|e| RelayError::launch(format!("cannot reserve a port on {}: {}", host, e)))?;
    let port = listener.local_addr()?.port();
    Ok(port)
}

/// Connect to `address`, retrying at a fixed interval until `timeout`.
async fn connect_with_retry(
    address: &str,
    timeout: Duration,
    interval: Duration,
) -> std::io::Result<BackendSocket> {
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        match TcpStream::connect(address).await {
            Ok(stream) => {
                debug!(
                    target: "debug_relay::backend",
                    "Connected to {} after {} attempt(s)",
                    address,
                    attempt + 1
                );
                return Ok(Box::new(stream));
            }
            Err(e) => {
                attempt += 1;
                if start.elapsed() >= timeout {
                    return Err(std::io::Error::new(
                        e.kind(),
                        format!("gave up after {} attempts: {}", attempt, e),
                    ));
                }
                trace!(
                    target: "debug_relay::backend",
                    "Connection attempt {} to {} failed, retrying in {:?}",
                    attempt,
                    address,
                    interval
                );
                tokio::time::sleep(interval).await;
            }
        }
    }
}
