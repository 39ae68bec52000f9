//! Sleep Scheduler: a periodic nightfall check and the bed routine.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::BehaviorConfig;
use crate::coordinator::{Activation, Coordinator};
use crate::world::{Block, BlockQuery, Goal, WorldClient, WorldEvent};

/// Check for nightfall every `sleep_poll_interval`, first after one interval.
pub(crate) async fn poll(coord: Coordinator) {
    let period = coord.config().sleep_poll_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        coord.check_nightfall().await;
    }
}

/// Nearest-first bed candidates around the agent.
pub(crate) async fn find_beds(
    world: &dyn WorldClient,
    cfg: &BehaviorConfig,
) -> anyhow::Result<Vec<Block>> {
    let query = BlockQuery::new(&cfg.bed_kinds, cfg.bed_search_radius, cfg.bed_candidates);
    let beds = world.find_blocks(&query).await?;
    debug!(candidates = beds.len(), "looking for a bed");
    Ok(beds)
}

pub(crate) async fn run(act: Activation, beds: Vec<Block>) {
    act.settle().await;

    let world = act.world();
    let cfg = act.config();

    let mut asleep = None;
    for bed in &beds {
        let goal = Goal::Proximity {
            pos: bed.pos,
            radius: cfg.bed_reach,
        };
        if let Err(e) = act.travel(goal).await {
            warn!(bed = %bed.pos, error = %e, "could not reach bed");
            continue;
        }

        // Listen before lying down so an immediate wake is not lost.
        let events = world.subscribe();
        match world.sleep(bed.pos).await {
            Ok(()) => {
                asleep = Some(events);
                break;
            }
            Err(e) => warn!(bed = %bed.pos, kind = %bed.kind, error = %e, "could not sleep in bed"),
        }
    }

    let Some(mut events) = asleep else {
        if act.finish() {
            act.say("I can't find a suitable bed!").await;
        }
        return;
    };

    act.say("It's night! I'm going to sleep!").await;
    if !wait_for_wake(&mut events).await {
        return;
    }
    info!("woke up");
    act.say("Rise and shine! Time to go fishing!").await;

    if !act.finish() || !act.resume_requested() {
        return;
    }
    time::sleep(cfg.wake_resume_delay).await;
    act.resume_fishing();
}

async fn wait_for_wake(events: &mut broadcast::Receiver<WorldEvent>) -> bool {
    loop {
        match events.recv().await {
            Ok(WorldEvent::Wake) => return true,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "wake listener lagged"),
            Err(RecvError::Closed) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::state::Mode;
    use crate::world::debug::{Action, DebugWorld};
    use crate::world::{BlockPos, Vec3};

    fn night_world() -> Arc<DebugWorld> {
        let world = DebugWorld::new("Fisher");
        world.set_day(false);
        world.set_position(Vec3::new(0.5, 64.0, 0.5));
        world
    }

    fn coordinator(world: &Arc<DebugWorld>) -> Coordinator {
        Coordinator::new(world.clone(), world.clone(), BehaviorConfig::default(), "!fish", false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_occupied_bed_falls_through_to_next() {
        let world = night_world();
        let near = BlockPos::new(2, 64, 0);
        let far = BlockPos::new(5, 64, 0);
        world.set_block(near, "red_bed");
        world.set_block(far, "blue_bed");
        world.occupy_bed(near);

        let coord = coordinator(&world);
        assert!(coord.begin_sleep().await);
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            world.count(|a| matches!(a, Action::Sleep(_))),
            2,
            "both beds tried"
        );
        assert!(world.is_asleep());
        assert_eq!(coord.mode(), Mode::Sleeping);
        assert_eq!(world.chats(), vec!["It's night! I'm going to sleep!".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_bed_leaves_mode_alone() {
        let world = night_world();
        let coord = coordinator(&world);

        assert!(!coord.begin_sleep().await);
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(coord.mode(), Mode::Idle);
        assert_eq!(world.chats(), vec!["I can't find a suitable bed!".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_beds_taken_goes_idle() {
        let world = night_world();
        let bed = BlockPos::new(2, 64, 0);
        world.set_block(bed, "red_bed");
        world.occupy_bed(bed);
        let coord = coordinator(&world);

        assert!(coord.begin_sleep().await);
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(coord.mode(), Mode::Idle);
        assert_eq!(world.chats(), vec!["I can't find a suitable bed!".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_waits_one_interval() {
        let world = night_world();
        world.set_block(BlockPos::new(2, 64, 0), "red_bed");
        let coord = coordinator(&world);
        coord.start();

        time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(coord.mode(), Mode::Idle);

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(coord.mode(), Mode::Sleeping);
        assert!(world.is_asleep());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_without_resume_stays_idle() {
        let world = night_world();
        world.set_block(BlockPos::new(2, 64, 0), "red_bed");
        let coord = coordinator(&world);

        coord.begin_sleep().await;
        time::sleep(Duration::from_millis(1)).await;
        world.dawn();
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(coord.mode(), Mode::Idle);
        assert_eq!(
            world.chats().last().map(String::as_str),
            Some("Rise and shine! Time to go fishing!")
        );
        assert_eq!(world.count(|a| matches!(a, Action::FindBlocks(k) if k[0] == "water")), 0);
    }
}
