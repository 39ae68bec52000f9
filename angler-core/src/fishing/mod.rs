//! The fishing loop: search → travel → equip → cast → wait → search …
//!
//! The loop restarts itself after every catch or timeout and only ends on an
//! error, a full inventory (handed over to storage) or when the coordinator
//! supersedes it.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};

use crate::config::BehaviorConfig;
use crate::coordinator::{Activation, Trigger};
use crate::error::BehaviorError;
use crate::state::FishingPhase;
use crate::world::{BlockPos, BlockQuery, EquipSlot, Goal, WorldClient, WorldEvent};

/// How many water blocks to examine per search, nearest first.
const WATER_CANDIDATES: usize = 64;

/// Horizontal neighbours of a block, checked at the water's level and one below.
const AROUND: [(i32, i32); 8] = [
    (-1, 1),
    (0, 1),
    (1, 1),
    (-1, 0),
    (1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Where to fish from: the water block to cast into and the block to stand on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FishingSpot {
    pub water: BlockPos,
    pub stand: BlockPos,
}

enum Cycle {
    Again,
    /// Another behavior took over or the loop ended quietly.
    Done,
}

pub(crate) async fn run(act: Activation) {
    act.settle().await;

    loop {
        match cycle(&act).await {
            Ok(Cycle::Again) => continue,
            Ok(Cycle::Done) => {
                act.finish();
                return;
            }
            Err(e) => {
                act.fail(e).await;
                return;
            }
        }
    }
}

async fn cycle(act: &Activation) -> Result<Cycle, BehaviorError> {
    let world = act.world();
    let cfg = act.config();

    let inventory = world
        .inventory()
        .await
        .map_err(|e| BehaviorError::action("inventory", e))?;
    if inventory.is_full() {
        // Storage either takes over (and cancels this task) or had nothing to store.
        act.coordinator().handle_trigger(Trigger::InventoryFull).await;
        return Ok(Cycle::Done);
    }

    if !act.enter_phase(FishingPhase::Searching) {
        return Ok(Cycle::Done);
    }
    let spot = find_spot(world, cfg).await?;
    debug!(water = %spot.water, stand = %spot.stand, "fishing spot found");

    act.enter_phase(FishingPhase::Traveling);
    act.travel(Goal::Point { pos: spot.stand }).await?;

    act.enter_phase(FishingPhase::Equipping);
    if let Err(e) = world.look_at(spot.water.top_center()).await {
        debug!(error = %e, "look_at failed");
    }
    world
        .equip(&cfg.tool_item, EquipSlot::Hand)
        .await
        .map_err(|e| BehaviorError::action("equip", e))?;

    tokio::time::sleep(cfg.cast_grace).await;
    act.enter_phase(FishingPhase::Casting);
    if let Err(e) = world.cast().await {
        info!(error = %e, "Fishing cancelled");
        return Ok(Cycle::Done);
    }

    act.enter_phase(FishingPhase::Waiting);
    let mut events = world.subscribe();
    let timeout = tokio::time::sleep(cfg.catch_timeout);

    // First signal wins; the loser is dropped with this scope.
    tokio::select! {
        biased;
        caught = next_catch(&mut events) => match caught {
            Some(item) => act.say(&format!("I caught a {item}!")).await,
            None => return Ok(Cycle::Done),
        },
        _ = timeout => {
            act.say("I didn't seem to catch anything even though I reeled in... Try moving me to another spot.")
                .await;
        }
    }

    Ok(Cycle::Again)
}

async fn next_catch(events: &mut broadcast::Receiver<WorldEvent>) -> Option<String> {
    loop {
        match events.recv().await {
            Ok(WorldEvent::ItemCollected { by_self: true, item }) => return Some(item),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "catch listener lagged"),
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Find a water block with open sky and a shore next to it, and the shore
/// block nearest to the agent to stand on.
///
/// Recomputed every cycle; the world may have changed since the last one.
pub async fn find_spot(
    world: &dyn WorldClient,
    cfg: &BehaviorConfig,
) -> Result<FishingSpot, BehaviorError> {
    let query = BlockQuery::new(
        std::slice::from_ref(&cfg.water_kind),
        cfg.water_search_radius,
        WATER_CANDIDATES,
    );
    let candidates = world
        .find_blocks(&query)
        .await
        .map_err(|e| BehaviorError::action("find water", e))?;

    let mut water = None;
    for candidate in candidates {
        if is_fishable(world, cfg, candidate.pos).await? {
            water = Some(candidate.pos);
            break;
        }
    }
    let water = water.ok_or_else(|| BehaviorError::empty("No water found nearby!"))?;

    let here = world
        .position()
        .await
        .map_err(|e| BehaviorError::action("position", e))?;

    let mut best: Option<(f64, BlockPos)> = None;
    for ground in [
        water.offset(1, 0, 0),
        water.offset(-1, 0, 0),
        water.offset(0, 0, 1),
        water.offset(0, 0, -1),
        water.offset(0, -1, 0),
    ] {
        if !is_standable(world, cfg, ground).await? {
            continue;
        }
        let distance = ground.top_center().distance_to(here);
        if best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, ground));
        }
    }

    let (_, ground) = best.ok_or_else(|| BehaviorError::empty("No place to stand!"))?;
    Ok(FishingSpot {
        water,
        stand: ground.above(),
    })
}

async fn kind_at(world: &dyn WorldClient, pos: BlockPos) -> Result<Option<String>, BehaviorError> {
    let block = world
        .block_at(pos)
        .await
        .map_err(|e| BehaviorError::action("block lookup", e))?;
    Ok(block.map(|b| b.kind))
}

async fn is_fishable(
    world: &dyn WorldClient,
    cfg: &BehaviorConfig,
    water: BlockPos,
) -> Result<bool, BehaviorError> {
    if kind_at(world, water.above()).await?.as_deref() != Some(cfg.air_kind.as_str()) {
        return Ok(false);
    }
    for dy in [0, -1] {
        for (dx, dz) in AROUND {
            match kind_at(world, water.offset(dx, dy, dz)).await? {
                Some(kind) if kind != cfg.air_kind && kind != cfg.water_kind => return Ok(true),
                _ => {}
            }
        }
    }
    Ok(false)
}

async fn is_standable(
    world: &dyn WorldClient,
    cfg: &BehaviorConfig,
    ground: BlockPos,
) -> Result<bool, BehaviorError> {
    let solid = match kind_at(world, ground).await? {
        Some(kind) => kind != cfg.air_kind && kind != cfg.water_kind,
        None => false,
    };
    if !solid {
        return Ok(false);
    }
    Ok(kind_at(world, ground.above()).await?.as_deref() == Some(cfg.air_kind.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::debug::DebugWorld;
    use crate::world::Vec3;

    /// A 3x1 pond at y=62 with grass on its west shore.
    fn pond(world: &DebugWorld) {
        for x in 0..3 {
            world.set_block(BlockPos::new(x, 62, 0), "water");
        }
        world.set_block(BlockPos::new(-1, 62, 0), "grass_block");
        world.set_position(Vec3::new(-5.5, 63.0, 0.5));
    }

    #[tokio::test]
    async fn test_finds_shore_next_to_water() {
        let world = DebugWorld::new("Fisher");
        pond(&world);

        let spot = find_spot(world.as_ref(), &BehaviorConfig::default()).await.unwrap();
        assert_eq!(spot.water, BlockPos::new(0, 62, 0));
        assert_eq!(spot.stand, BlockPos::new(-1, 63, 0));
    }

    #[tokio::test]
    async fn test_open_water_is_not_a_spot() {
        let world = DebugWorld::new("Fisher");
        world.set_block(BlockPos::new(0, 62, 0), "water");

        let err = find_spot(world.as_ref(), &BehaviorConfig::default()).await.unwrap_err();
        assert_eq!(err.notice(), "No water found nearby!");
    }

    #[tokio::test]
    async fn test_covered_shore_is_not_standable() {
        let world = DebugWorld::new("Fisher");
        pond(&world);
        // Shore exists for the water check but is buried under a block.
        world.set_block(BlockPos::new(-1, 63, 0), "stone");

        let err = find_spot(world.as_ref(), &BehaviorConfig::default()).await.unwrap_err();
        assert_eq!(err.notice(), "No place to stand!");
    }

    #[tokio::test]
    async fn test_covered_water_is_skipped() {
        let world = DebugWorld::new("Fisher");
        pond(&world);
        world.set_block(BlockPos::new(0, 63, 0), "oak_planks");
        world.set_block(BlockPos::new(3, 62, 0), "sand");

        let spot = find_spot(world.as_ref(), &BehaviorConfig::default()).await.unwrap();
        // (1,62,0) only borders water, so the far end of the pond is used.
        assert_eq!(spot.water, BlockPos::new(2, 62, 0));
        assert_eq!(spot.stand, BlockPos::new(3, 63, 0));
    }
}
