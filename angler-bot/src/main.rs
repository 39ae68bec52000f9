use std::env;
use std::future::Future;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use angler_core::{BehaviorConfig, Coordinator, WorldClient, WorldEvent};

mod bridge;
mod console;
mod protocol;

use bridge::BridgeClient;

const DEFAULT_BRIDGE_ADDR: &str = "127.0.0.1:25580";

#[derive(Debug, Parser)]
#[command(name = "angler-bot")]
#[command(about = "Autonomous fishing agent: fishes, sleeps at night and stores its catch")]
struct Cli {
    /// Chat prefix this agent answers to (the global prefix `!all` always works)
    prefix: String,

    /// Game server host
    host: String,

    /// Game server port
    port: u16,

    /// Username to join as
    username: String,

    /// Serve the browser viewer on this port (enables path drawing and click-to-move)
    viewer_port: Option<u16>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| "angler_bot=info,angler_core=info".into());

    let json = env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    match block_on_detached(run(cli)) {
        Ok(Ok(reason)) => {
            info!(reason = %reason, "agent stopped");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!(error = ?e, "agent failed to start");
            ExitCode::from(1)
        }
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            ExitCode::from(1)
        }
    }
}

/// Drive `future` on a fresh current-thread runtime, then shut the runtime
/// down without waiting on blocking work. The console's stdin read stays
/// parked on a blocking-pool thread until a line arrives, so a plain runtime
/// drop would keep a kicked agent alive.
fn block_on_detached<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

/// Join the world and run until kicked. Returns the shutdown reason.
async fn run(cli: Cli) -> Result<String> {
    let bridge_addr =
        env::var("ANGLER_BRIDGE_ADDR").unwrap_or_else(|_| DEFAULT_BRIDGE_ADDR.to_string());
    let bridge = BridgeClient::connect(bridge_addr.trim(), &cli.username).await?;

    // Subscribe before joining so the spawn event cannot slip past.
    let mut events = bridge.subscribe();
    bridge
        .join(&cli.host, cli.port, cli.viewer_port)
        .await
        .with_context(|| format!("joining {}:{} as {}", cli.host, cli.port, cli.username))?;
    if let Some(reason) = wait_for_spawn(&mut events).await? {
        info!(reason = %reason, "Kicked: {reason}");
        return Ok(reason);
    }
    drop(events);

    let config = BehaviorConfig::from_env();
    info!(
        username = %cli.username,
        prefix = %cli.prefix,
        viewer_port = ?cli.viewer_port,
        tool = %config.tool_item,
        "agent spawned"
    );

    let coordinator = Coordinator::new(
        bridge.clone(),
        bridge,
        config,
        cli.prefix,
        cli.viewer_port.is_some(),
    );
    coordinator.start();

    let console = tokio::spawn(console::run(coordinator.clone()));
    let reason = coordinator.closed().await;
    console.abort();
    Ok(reason)
}

/// Wait for the agent to appear in the world. `Some(reason)` when it was
/// kicked instead.
async fn wait_for_spawn(
    events: &mut tokio::sync::broadcast::Receiver<WorldEvent>,
) -> Result<Option<String>> {
    loop {
        match events.recv().await {
            Ok(WorldEvent::Spawn) => return Ok(None),
            Ok(WorldEvent::Kicked { reason }) => return Ok(Some(reason)),
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => bail!("world bridge closed before spawning"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_parked_blocking_read_does_not_delay_exit() {
        let started = Instant::now();
        let reason = block_on_detached(async {
            // Stands in for a stdin read nobody answers.
            let _ = tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(30)));
            tokio::task::yield_now().await;
            "kicked".to_string()
        })
        .unwrap();

        assert_eq!(reason, "kicked");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_positional_arguments() {
        let cli = Cli::try_parse_from(["angler-bot", "!f", "localhost", "25565", "Fisher"]).unwrap();
        assert_eq!(cli.prefix, "!f");
        assert_eq!(cli.port, 25565);
        assert_eq!(cli.viewer_port, None);

        assert!(Cli::try_parse_from(["angler-bot", "!f", "localhost", "not-a-port", "Fisher"]).is_err());
    }
}
