//! Operator console: stdin lines go through the same dispatch as chat
//! commands, issued in the agent's own name.

use angler_core::{parse_command, BehaviorError, Coordinator, Dispatch};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

pub async fn run(coordinator: Coordinator) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("console closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "console read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line, coordinator.username()) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %BehaviorError::from(e), "ignoring malformed console command");
                continue;
            }
        };
        match coordinator.handle_command(command).await {
            Dispatch::Ignored => {}
            dispatched => info!("{dispatched}"),
        }
    }
}
