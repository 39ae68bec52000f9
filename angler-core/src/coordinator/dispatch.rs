//! Keyword dispatch for operator commands.

use std::fmt;

use tracing::{debug, info, warn};

use super::{Activation, Coordinator};
use crate::command::Command;
use crate::fishing::find_spot;
use crate::state::{Mode, Resume};
use crate::world::{BlockPos, Goal, Player, Vec3};

/// The action a command was dispatched to. Displays as the console echo line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    StartFishing,
    StopFishing,
    Sleep,
    NearWater,
    GoTo,
    Store,
    Follow,
    Unfollow,
    UseItem,
    /// Unknown keyword; nothing happened.
    Ignored,
}

impl fmt::Display for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = match self {
            Dispatch::StartFishing => "Fishing started",
            Dispatch::StopFishing => "Fishing stopped",
            Dispatch::Sleep => "Trying to sleep",
            Dispatch::NearWater => "Trying to go near water",
            Dispatch::GoTo => "Going to target",
            Dispatch::Store => "Storing items",
            Dispatch::Follow => "Following target",
            Dispatch::Unfollow => "Stopped following",
            Dispatch::UseItem => "Used held item",
            Dispatch::Ignored => "Unknown command",
        };
        f.write_str(line)
    }
}

impl Coordinator {
    /// Execute an operator command from chat or the console.
    pub async fn handle_command(&self, command: Command) -> Dispatch {
        if self.is_shut_down() {
            return Dispatch::Ignored;
        }
        info!(
            keyword = %command.keyword,
            issuer = %command.issuer,
            args = ?command.args,
            "command received"
        );

        match command.keyword.as_str() {
            "start" => {
                self.start_fishing();
                Dispatch::StartFishing
            }
            "stop" => {
                self.stop_fishing();
                Dispatch::StopFishing
            }
            "sleep" => {
                self.sleep_now().await;
                Dispatch::Sleep
            }
            "nearwater" => {
                self.go_near_water();
                Dispatch::NearWater
            }
            "goto" => {
                self.goto(&command).await;
                Dispatch::GoTo
            }
            "store" => {
                let store_all = command
                    .args
                    .first()
                    .is_some_and(|arg| arg.eq_ignore_ascii_case("all"));
                self.store_catches(store_all).await;
                Dispatch::Store
            }
            "follow" => {
                self.follow(&command).await;
                Dispatch::Follow
            }
            "unfollow" => {
                self.unfollow();
                Dispatch::Unfollow
            }
            "rc" => {
                if let Err(e) = self.inner.world.activate_item().await {
                    warn!(error = %e, "use item failed");
                }
                Dispatch::UseItem
            }
            other => {
                debug!(keyword = other, "ignoring unknown command");
                Dispatch::Ignored
            }
        }
    }

    async fn sleep_now(&self) {
        match self.inner.world.is_day().await {
            Ok(false) => {
                self.handle_trigger(super::Trigger::Nightfall).await;
            }
            Ok(true) => info!("it is daytime, not going to bed"),
            Err(e) => warn!(error = %e, "time-of-day check failed"),
        }
    }

    fn go_near_water(&self) -> bool {
        self.activate(
            Mode::Navigating,
            Resume::Forget,
            |_| true,
            "near-water",
            |act| Box::pin(near_water(act)),
        )
    }

    async fn goto(&self, command: &Command) {
        let (announce, pos) = match command.args.as_slice() {
            [name] => match self.resolve_player(name, &command.issuer).await {
                Some(player) => (player.username, player.position.block()),
                None => return,
            },
            [x, y, z] => match parse_coords(x, y, z) {
                Some(target) => (format!("{x}, {y}, {z}"), target.block()),
                None => {
                    self.say("I don't understand!").await;
                    return;
                }
            },
            _ => {
                self.say("I don't understand!").await;
                return;
            }
        };

        let goal = Goal::Proximity {
            pos,
            radius: self.inner.config.goto_radius,
        };
        self.navigate_to(goal, Some(format!("I'm going to {announce}!")), Some("I'm here!"));
    }

    /// Walk to the block above `pos`; used for viewer clicks.
    pub(super) fn go_above(&self, pos: BlockPos) -> bool {
        self.navigate_to(Goal::Point { pos: pos.above() }, None, None)
    }

    fn navigate_to(
        &self,
        goal: Goal,
        announce: Option<String>,
        arrival: Option<&'static str>,
    ) -> bool {
        self.activate(
            Mode::Navigating,
            Resume::Forget,
            |_| true,
            "goto",
            move |act| {
                Box::pin(async move {
                    act.settle().await;
                    if let Some(text) = announce {
                        act.say(&text).await;
                    }
                    match act.travel(goal).await {
                        Ok(()) => {
                            if act.finish() {
                                if let Some(text) = arrival {
                                    act.say(text).await;
                                }
                            }
                        }
                        Err(e) => act.fail(e).await,
                    }
                })
            },
        )
    }

    async fn follow(&self, command: &Command) {
        let player = match command.args.as_slice() {
            [name] => match self.resolve_player(name, &command.issuer).await {
                Some(player) => player,
                None => return,
            },
            _ => {
                self.say("I don't understand!").await;
                return;
            }
        };

        let goal = Goal::FollowEntity {
            entity_id: player.entity_id,
            radius: self.inner.config.follow_radius,
        };
        let announce = format!("I'm following {}!", player.username);
        self.activate(
            Mode::Following,
            Resume::Forget,
            |_| true,
            "follow",
            move |act| {
                Box::pin(async move {
                    act.settle().await;
                    act.say(&announce).await;
                    match act.travel(goal).await {
                        Err(e) if act.is_current() => act.fail(e).await,
                        _ => {
                            act.finish();
                        }
                    }
                })
            },
        );
    }

    fn unfollow(&self) -> bool {
        self.activate(
            Mode::Idle,
            Resume::Forget,
            |_| true,
            "unfollow",
            |act| {
                Box::pin(async move {
                    act.settle().await;
                    act.nav().cancel().await;
                    act.say("Stopped following.").await;
                    act.finish();
                })
            },
        )
    }

    /// Look up a player named in a command. `me` is the issuer; the agent's
    /// own name is ignored without a reply.
    async fn resolve_player(&self, name: &str, issuer: &str) -> Option<Player> {
        if name == self.username() {
            return None;
        }
        let name = if name == "me" { issuer } else { name };

        match self.inner.world.player(name).await {
            Ok(Some(player)) => Some(player),
            Ok(None) => {
                self.say(&format!("Can't find anyone with the name {name}"))
                    .await;
                None
            }
            Err(e) => {
                warn!(error = %e, player = name, "player lookup failed");
                None
            }
        }
    }
}

async fn near_water(act: Activation) {
    act.settle().await;

    let spot = match find_spot(act.world(), act.config()).await {
        Ok(spot) => spot,
        Err(e) => return act.fail(e).await,
    };
    match act.travel(Goal::Point { pos: spot.stand }).await {
        Ok(()) => {
            if act.finish() {
                act.say("Reached my spot!").await;
            }
        }
        Err(e) => act.fail(e).await,
    }
}

fn parse_coords(x: &str, y: &str, z: &str) -> Option<Vec3> {
    Some(Vec3::new(
        x.parse().ok()?,
        y.parse().ok()?,
        z.parse().ok()?,
    ))
}
