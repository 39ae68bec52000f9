//! Storage Manager: walk to the nearest chest and empty the inventory into it.

use tracing::{info, warn};

use crate::coordinator::Activation;
use crate::error::BehaviorError;
use crate::world::{BlockQuery, Goal, Inventory, ItemStack};

/// Items that would be stored: everything but the tool, or everything with `store_all`.
pub fn eligible_items(inventory: &Inventory, tool_item: &str, store_all: bool) -> Vec<ItemStack> {
    inventory
        .items
        .iter()
        .filter(|item| store_all || item.name != tool_item)
        .cloned()
        .collect()
}

pub(crate) async fn run(act: Activation, items: Vec<ItemStack>) {
    act.settle().await;

    match store(&act, &items).await {
        Ok(stored) => {
            info!(stored, stacks = items.len(), "storage finished");
            if !act.resume_fishing() {
                act.finish();
            }
        }
        Err(e) => act.fail(e).await,
    }
}

async fn store(act: &Activation, items: &[ItemStack]) -> Result<u32, BehaviorError> {
    let world = act.world();
    let cfg = act.config();

    let query = BlockQuery::new(
        std::slice::from_ref(&cfg.container_kind),
        cfg.container_search_radius,
        1,
    );
    let chest = world
        .find_blocks(&query)
        .await
        .map_err(|e| BehaviorError::action("find chest", e))?
        .into_iter()
        .next()
        .ok_or_else(|| BehaviorError::empty("No chests nearby!"))?;

    act.travel(Goal::Proximity {
        pos: chest.pos,
        radius: cfg.container_reach,
    })
    .await?;

    let container = world
        .open_container(chest.pos)
        .await
        .map_err(|e| BehaviorError::action("open chest", e))?;

    let mut stored = 0;
    for item in items {
        match world.deposit(container, item).await {
            Ok(()) => stored += item.count,
            Err(e) => warn!(item = %item.name, count = item.count, error = %e, "deposit failed"),
        }
    }

    act.say(&format!("Stored {stored} item(s)!")).await;

    if let Err(e) = world.close_container(container).await {
        warn!(error = %e, "close chest failed");
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(name: &str, count: u32) -> ItemStack {
        ItemStack {
            name: name.to_string(),
            display_name: name.to_string(),
            count,
        }
    }

    #[test]
    fn test_tool_is_kept_unless_storing_all() {
        let inventory = Inventory {
            items: vec![stack("fishing_rod", 1), stack("cod", 5), stack("salmon", 2)],
            empty_slots: 33,
        };

        let names: Vec<_> = eligible_items(&inventory, "fishing_rod", false)
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["cod", "salmon"]);
        assert_eq!(eligible_items(&inventory, "fishing_rod", true).len(), 3);
    }

    #[test]
    fn test_only_tool_means_nothing_to_store() {
        let inventory = Inventory {
            items: vec![stack("fishing_rod", 1)],
            empty_slots: 35,
        };
        assert!(eligible_items(&inventory, "fishing_rod", false).is_empty());
    }
}
