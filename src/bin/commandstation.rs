//! Command station server.
//!
//! Opens every configured link, keeps one runner task per link and serves
//! the HTTP API over all of them. A link that fails or loses its transport
//! is reopened with the configured reconnect backoff.
//!
//! # Usage
//!
//! ```sh
//! cargo run --features server -- station.json
//! RUST_LOG=debug cargo run --features server -- station.json
//! ```
//!
//! Without a config file the server starts with no links and only the HTTP
//! API. A config file looks like:
//!
//! ```json
//! {
//!   "links": [
//!     { "z21": { "name": "z21", "host": "192.168.0.111" } },
//!     { "cbus": { "name": "cbus", "device": "/dev/ttyACM0" } }
//!   ],
//!   "reconnect": { "initial_ms": 1000, "max_attempts": 10 },
//!   "capture": { "enabled": true, "directory": "captures" },
//!   "web": { "port": 8080 }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use rs_commandstation::services::{
    run_server, spawn_link, LinkHandle, SharedPowerState, WebServerConfig, WebState,
};
use rs_commandstation::{Config, LinkConfig, LinkStatus};

type Running = (LinkHandle, JoinHandle<LinkStatus>);

fn load_config() -> anyhow::Result<Config> {
    let Some(path) = std::env::args().nth(1) else {
        warn!("no config file given, starting without links");
        return Ok(Config::default());
    };
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("reading config {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {path}"))
}

async fn start(
    link: &LinkConfig,
    config: &Config,
    shared: &Arc<SharedPowerState>,
) -> Option<Running> {
    match spawn_link(link, &config.limits, &config.capture, Arc::clone(shared)).await {
        Ok(running) => Some(running),
        Err(e) => {
            error!("[{}] not started: {}", link.name(), e);
            None
        }
    }
}

/// Keep `link` running until shutdown.
///
/// The attempt counter starts over once the command station has answered on
/// a link, so a long-running link that drops gets the short delay again.
async fn supervise(
    link: LinkConfig,
    config: Arc<Config>,
    shared: Arc<SharedPowerState>,
    web: Arc<WebState>,
    mut running: Option<Running>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = link.name().to_string();
    let mut attempt = 0u32;

    loop {
        if let Some((handle, mut task)) = running.take() {
            web.replace_link(handle.clone());
            let ended = tokio::select! {
                result = &mut task => Some(result),
                _ = shutdown.changed() => None,
            };
            let finished = match ended {
                Some(result) => result,
                None => {
                    handle.close();
                    task.await
                }
            };
            match finished {
                Ok(status) => info!("[{}] runner ended: {}", name, status.as_str()),
                Err(e) => error!("[{}] runner panicked: {}", name, e),
            }
            let answered = shared
                .link(handle.id())
                .is_some_and(|l| l.stats.frames_rx > 0);
            if answered {
                attempt = 0;
            }
        }
        if *shutdown.borrow() {
            return;
        }

        let Some(delay) = config.reconnect.delay_ms(attempt) else {
            error!("[{}] giving up after {} attempts", name, attempt);
            return;
        };
        attempt += 1;
        info!("[{}] reconnecting in {} ms (attempt {})", name, delay, attempt);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay as u64)) => {}
            _ = shutdown.changed() => return,
        }
        running = start(&link, &config, &shared).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Arc::new(load_config()?);
    info!(
        "{} starting with {} link(s)",
        config.device.name,
        config.links.len()
    );

    let shared = Arc::new(SharedPowerState::new());

    // First attempt in configuration order so the first link is the default
    let mut first = Vec::new();
    for link in &config.links {
        first.push(start(link, &config, &shared).await);
    }
    let handles = first
        .iter()
        .flatten()
        .map(|(handle, _)| handle.clone())
        .collect();
    let web = Arc::new(WebState::new(Arc::clone(&shared), handles));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisors: Vec<_> = config
        .links
        .iter()
        .zip(first)
        .map(|(link, running)| {
            tokio::spawn(supervise(
                link.clone(),
                Arc::clone(&config),
                Arc::clone(&shared),
                Arc::clone(&web),
                running,
                shutdown_rx.clone(),
            ))
        })
        .collect();

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("ctrl-c handler failed: {}", e);
        }
    };

    if config.web.enabled {
        run_server(
            Arc::clone(&web),
            WebServerConfig::from_config(&config.web),
            ctrl_c,
        )
        .await
        .context("web server")?;
    } else {
        ctrl_c.await;
    }

    info!("shutting down");
    shutdown_tx.send_replace(true);
    for supervisor in supervisors {
        if let Err(e) = supervisor.await {
            error!("supervisor failed: {}", e);
        }
    }
    Ok(())
}
