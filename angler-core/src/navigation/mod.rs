use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast::error::RecvError, oneshot};
use tracing::{debug, info, warn};

use crate::world::{Goal, Pathfinder, WorldClient, WorldEvent};

/// How a navigation request ended. Each request resolves exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavOutcome {
    Reached,
    /// Superseded by a newer goal or cancelled explicitly.
    Cancelled,
    Failed(String),
}

struct PendingGoal {
    id: u64,
    cancel: oneshot::Sender<()>,
}

/// Wraps the pathfinder so that every goal yields a single future.
///
/// Issuing a goal resolves the previous pending goal as
/// [`NavOutcome::Cancelled`] and drops its listener, so a late "goal reached"
/// can never be attributed to the wrong request.
pub struct NavigationController {
    world: Arc<dyn WorldClient>,
    pathfinder: Arc<dyn Pathfinder>,
    pending: Mutex<Option<PendingGoal>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for NavigationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationController")
            .field("world", &"Arc<dyn WorldClient>")
            .field("pathfinder", &"Arc<dyn Pathfinder>")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl NavigationController {
    pub fn new(world: Arc<dyn WorldClient>, pathfinder: Arc<dyn Pathfinder>) -> Self {
        Self {
            world,
            pathfinder,
            pending: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Drive the agent towards `goal`.
    ///
    /// Resolves on arrival, on cancellation (a newer goal or [`Goal::Cancel`]),
    /// or when the pathfinder gives up. Follow goals only end by cancellation
    /// or failure.
    pub async fn set_goal(&self, goal: Goal) -> NavOutcome {
        if goal == Goal::Cancel {
            self.cancel().await;
            return NavOutcome::Cancelled;
        }

        // Listen before the goal goes out: a pathfinder that is already there
        // reports "reached" from inside `set_goal`.
        let mut events = self.world.subscribe();
        let (cancel_tx, mut cancelled) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.replace_pending(Some(PendingGoal { id, cancel: cancel_tx }));

        match self.world.is_sleeping().await {
            Ok(true) => {
                info!("waking up before moving");
                if let Err(e) = self.world.wake().await {
                    warn!(error = %e, "wake request failed");
                }
            }
            Ok(false) => {}
            Err(e) => debug!(error = %e, "could not query sleep state"),
        }

        debug!(goal_id = id, ?goal, "issuing goal");
        if let Err(e) = self.pathfinder.set_goal(&goal).await {
            self.release(id);
            return NavOutcome::Failed(e.to_string());
        }

        let dynamic = goal.is_dynamic();
        loop {
            tokio::select! {
                biased;
                _ = &mut cancelled => {
                    debug!(goal_id = id, "goal superseded");
                    return NavOutcome::Cancelled;
                }
                event = events.recv() => match event {
                    Ok(WorldEvent::GoalReached) if !dynamic => {
                        self.release(id);
                        return NavOutcome::Reached;
                    }
                    Ok(WorldEvent::PathFailed { reason }) => {
                        self.release(id);
                        return NavOutcome::Failed(reason);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(goal_id = id, skipped, "navigation listener lagged");
                    }
                    Err(RecvError::Closed) => {
                        self.release(id);
                        return NavOutcome::Failed("world connection closed".to_string());
                    }
                },
            }
        }
    }

    /// Stop moving and resolve any pending goal as cancelled.
    pub async fn cancel(&self) {
        self.replace_pending(None);
        if let Err(e) = self.pathfinder.cancel_goal().await {
            warn!(error = %e, "cancel goal failed");
        }
    }

    /// Whether a goal is still waiting for its outcome.
    pub fn has_pending(&self) -> bool {
        self.lock_pending().is_some()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<PendingGoal>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn replace_pending(&self, next: Option<PendingGoal>) {
        let previous = std::mem::replace(&mut *self.lock_pending(), next);
        if let Some(previous) = previous {
            // The receiver is gone when its task was aborted; nothing to notify then.
            let _ = previous.cancel.send(());
        }
    }

    fn release(&self, id: u64) {
        let mut pending = self.lock_pending();
        if pending.as_ref().is_some_and(|p| p.id == id) {
            *pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::debug::{Action, DebugWorld};
    use crate::world::BlockPos;

    fn controller(world: &Arc<DebugWorld>) -> Arc<NavigationController> {
        Arc::new(NavigationController::new(world.clone(), world.clone()))
    }

    #[tokio::test]
    async fn test_reached_resolves_once() {
        let world = DebugWorld::new("Fisher");
        let nav = controller(&world);

        let outcome = nav.set_goal(Goal::Point { pos: BlockPos::new(3, 64, 3) }).await;
        assert_eq!(outcome, NavOutcome::Reached);
        assert!(!nav.has_pending());
    }

    #[tokio::test]
    async fn test_new_goal_supersedes_pending_one() {
        let world = DebugWorld::new("Fisher");
        world.set_auto_reach(false);
        let nav = controller(&world);

        let first = tokio::spawn({
            let nav = nav.clone();
            async move { nav.set_goal(Goal::Point { pos: BlockPos::new(1, 64, 1) }).await }
        });
        tokio::task::yield_now().await;
        assert!(nav.has_pending());

        let second = tokio::spawn({
            let nav = nav.clone();
            async move {
                nav.set_goal(Goal::Proximity { pos: BlockPos::new(9, 64, 9), radius: 1 })
                    .await
            }
        });

        assert_eq!(first.await.unwrap(), NavOutcome::Cancelled);
        tokio::task::yield_now().await;
        world.emit(WorldEvent::GoalReached);
        assert_eq!(second.await.unwrap(), NavOutcome::Reached);
    }

    #[tokio::test]
    async fn test_wakes_before_forwarding_goal() {
        let world = DebugWorld::new("Fisher");
        world.set_day(false);
        world.sleep(BlockPos::new(0, 64, 0)).await.unwrap();
        let nav = controller(&world);

        nav.set_goal(Goal::Point { pos: BlockPos::new(2, 64, 2) }).await;

        let actions = world.actions();
        let wake = actions.iter().position(|a| *a == Action::Wake).unwrap();
        let goal = actions
            .iter()
            .position(|a| matches!(a, Action::SetGoal(_)))
            .unwrap();
        assert!(wake < goal);
        assert!(!world.is_asleep());
    }

    #[tokio::test]
    async fn test_follow_ignores_reached_and_ends_on_cancel() {
        let world = DebugWorld::new("Fisher");
        let nav = controller(&world);

        let follow = tokio::spawn({
            let nav = nav.clone();
            async move { nav.set_goal(Goal::FollowEntity { entity_id: 7, radius: 3 }).await }
        });
        tokio::task::yield_now().await;
        world.emit(WorldEvent::GoalReached);
        tokio::task::yield_now().await;
        assert!(!follow.is_finished());

        assert_eq!(nav.set_goal(Goal::Cancel).await, NavOutcome::Cancelled);
        assert_eq!(follow.await.unwrap(), NavOutcome::Cancelled);
        assert_eq!(world.count(|a| *a == Action::CancelGoal), 1);
    }

    #[tokio::test]
    async fn test_path_failure() {
        let world = DebugWorld::new("Fisher");
        world.set_auto_reach(false);
        let nav = controller(&world);

        let pending = tokio::spawn({
            let nav = nav.clone();
            async move { nav.set_goal(Goal::Point { pos: BlockPos::new(1, 64, 1) }).await }
        });
        tokio::task::yield_now().await;
        world.emit(WorldEvent::PathFailed { reason: "no path".to_string() });

        assert_eq!(pending.await.unwrap(), NavOutcome::Failed("no path".to_string()));
    }
}
