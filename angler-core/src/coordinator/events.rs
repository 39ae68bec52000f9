//! World event pump: chat commands, kicks and the odd side signal.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::{Coordinator, Trigger};
use crate::command::{parse_command, strip_chat_prefix};
use crate::error::BehaviorError;
use crate::world::{PathStats, Vec3, WorldEvent};

/// Right mouse button in the viewer.
const VIEWER_MOVE_BUTTON: u8 = 2;

pub(super) async fn pump(coord: Coordinator, mut events: broadcast::Receiver<WorldEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => coord.on_event(event).await,
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event pump lagged"),
            Err(RecvError::Closed) => {
                coord
                    .handle_trigger(Trigger::Kicked {
                        reason: "connection closed".to_string(),
                    })
                    .await;
                return;
            }
        }
    }
}

impl Coordinator {
    async fn on_event(&self, event: WorldEvent) {
        match event {
            WorldEvent::Chat { username, message } => self.on_chat(&username, &message).await,
            WorldEvent::Kicked { reason } => {
                self.handle_trigger(Trigger::Kicked { reason }).await;
            }
            WorldEvent::EntityHurt { is_self: true } => {
                self.say("I'm being attacked! Help!!!").await;
            }
            WorldEvent::PathUpdate(stats) => self.on_path_update(&stats).await,
            WorldEvent::BlockClicked { pos, button } => {
                if button == VIEWER_MOVE_BUTTON && self.state().using_viewer {
                    debug!(%pos, "viewer click");
                    self.go_above(pos);
                }
            }
            WorldEvent::DayNightChanged { is_day } => debug!(is_day, "day/night changed"),
            _ => {}
        }
    }

    async fn on_chat(&self, sender: &str, message: &str) {
        info!(sender, "{message}");

        let Some(line) = strip_chat_prefix(message, sender, self.username(), self.prefix()) else {
            return;
        };
        match parse_command(line, sender) {
            Ok(command) => {
                self.handle_command(command).await;
            }
            Err(e) => warn!(error = %BehaviorError::from(e), sender, "ignoring malformed command"),
        }
    }

    async fn on_path_update(&self, stats: &PathStats) {
        info!(
            "{} moves. ({:.2} ms, ({:.2} n/t)). {}",
            stats.path.len(),
            stats.time_ms,
            stats.nodes_per_tick(),
            stats.status
        );

        if !self.state().using_viewer {
            return;
        }
        let here = match self.inner.world.position().await {
            Ok(here) => here,
            Err(e) => {
                debug!(error = %e, "no position for path drawing");
                return;
            }
        };
        let points: Vec<Vec3> = std::iter::once(here)
            .chain(stats.path.iter().copied())
            .map(|p| Vec3::new(p.x, p.y + 0.5, p.z))
            .collect();
        if let Err(e) = self.inner.world.draw_path(&points).await {
            debug!(error = %e, "draw path failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::BehaviorConfig;
    use crate::state::Mode;
    use crate::world::debug::{Action, DebugWorld};
    use crate::world::{BlockPos, Goal};

    fn coordinator(world: &Arc<DebugWorld>, using_viewer: bool) -> Coordinator {
        Coordinator::new(
            world.clone(),
            world.clone(),
            BehaviorConfig::default(),
            "!fish",
            using_viewer,
        )
    }

    #[tokio::test]
    async fn test_own_chat_is_not_a_command() {
        let world = DebugWorld::new("Fisher");
        let coord = coordinator(&world, false);

        coord.on_chat("Fisher", "!fish unfollow").await;
        coord.on_chat("Alice", "hello there").await;
        tokio::task::yield_now().await;

        assert!(world.actions().is_empty());
        assert_eq!(coord.mode(), Mode::Idle);
    }

    #[tokio::test]
    async fn test_global_prefix_reaches_agent() {
        let world = DebugWorld::new("Fisher");
        let coord = coordinator(&world, false);

        coord.on_chat("Alice", "!all unfollow").await;
        tokio::task::yield_now().await;

        assert_eq!(world.count(|a| *a == Action::CancelGoal), 1);
        assert_eq!(world.chats(), vec!["Stopped following.".to_string()]);
    }

    #[tokio::test]
    async fn test_hurt_asks_for_help() {
        let world = DebugWorld::new("Fisher");
        let coord = coordinator(&world, false);

        coord.on_event(WorldEvent::EntityHurt { is_self: false }).await;
        coord.on_event(WorldEvent::EntityHurt { is_self: true }).await;

        assert_eq!(world.chats(), vec!["I'm being attacked! Help!!!".to_string()]);
    }

    #[tokio::test]
    async fn test_path_drawn_only_with_viewer() {
        let stats = PathStats {
            path: vec![Vec3::new(1.0, 64.0, 1.0), Vec3::new(2.0, 64.0, 1.0)],
            time_ms: 4.0,
            visited_nodes: 12,
            status: "success".to_string(),
        };

        let world = DebugWorld::new("Fisher");
        coordinator(&world, false)
            .on_event(WorldEvent::PathUpdate(stats.clone()))
            .await;
        assert!(world.actions().is_empty());

        coordinator(&world, true)
            .on_event(WorldEvent::PathUpdate(stats))
            .await;
        assert_eq!(world.actions(), vec![Action::DrawPath(3)]);
    }

    #[tokio::test]
    async fn test_viewer_right_click_walks_on_top() {
        let world = DebugWorld::new("Fisher");
        let coord = coordinator(&world, true);

        coord
            .on_event(WorldEvent::BlockClicked { pos: BlockPos::new(4, 63, 4), button: 0 })
            .await;
        coord
            .on_event(WorldEvent::BlockClicked { pos: BlockPos::new(4, 63, 4), button: 2 })
            .await;
        tokio::task::yield_now().await;

        assert_eq!(world.goals(), vec![Goal::Point { pos: BlockPos::new(4, 64, 4) }]);
    }
}
