//! In-memory world for tests and offline runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use super::{
    Block, BlockPos, BlockQuery, ContainerHandle, EquipSlot, Goal, Inventory, ItemStack,
    Pathfinder, Player, Vec3, WorldClient, WorldEvent,
};

/// A world action the agent performed, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Chat(String),
    FindBlocks(Vec<String>),
    LookAt(Vec3),
    Equip(String),
    Cast,
    ActivateItem,
    Sleep(BlockPos),
    Wake,
    OpenContainer(BlockPos),
    Deposit(String, u32),
    CloseContainer,
    SetGoal(Goal),
    CancelGoal,
    DrawPath(usize),
}

#[derive(Debug)]
struct DebugState {
    blocks: HashMap<BlockPos, String>,
    position: Vec3,
    players: HashMap<String, Player>,
    items: Vec<ItemStack>,
    slots: usize,
    is_day: bool,
    sleeping: bool,
    occupied_beds: HashSet<BlockPos>,
    failing_deposits: HashSet<String>,
    auto_reach: bool,
    hold_casts: bool,
    actions: Vec<Action>,
}

/// A simple, non-persistent world that records every action.
///
/// Unknown positions read as `air`. The built-in pathfinder teleports the
/// agent and emits [`WorldEvent::GoalReached`] immediately when `auto_reach`
/// is on (the default); otherwise goals stay pending until the test emits an
/// event itself.
#[derive(Debug)]
pub struct DebugWorld {
    username: String,
    events: broadcast::Sender<WorldEvent>,
    reel: Notify,
    state: Mutex<DebugState>,
}

impl DebugWorld {
    pub fn new(username: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            username: username.to_string(),
            events,
            reel: Notify::new(),
            state: Mutex::new(DebugState {
                blocks: HashMap::new(),
                position: Vec3::new(0.5, 64.0, 0.5),
                players: HashMap::new(),
                items: Vec::new(),
                slots: 36,
                is_day: true,
                sleeping: false,
                occupied_beds: HashSet::new(),
                failing_deposits: HashSet::new(),
                auto_reach: true,
                hold_casts: false,
                actions: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, DebugState> {
        // A panicking test thread must not hide the recorded actions from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, action: Action) {
        self.lock().actions.push(action);
    }

    // --- Scenario setup ---

    pub fn set_block(&self, pos: BlockPos, kind: &str) {
        self.lock().blocks.insert(pos, kind.to_string());
    }

    pub fn set_position(&self, position: Vec3) {
        self.lock().position = position;
    }

    pub fn add_player(&self, username: &str, entity_id: u32, position: Vec3) {
        self.lock().players.insert(
            username.to_string(),
            Player {
                username: username.to_string(),
                entity_id,
                position,
            },
        );
    }

    pub fn give(&self, name: &str, count: u32) {
        self.lock().items.push(ItemStack {
            name: name.to_string(),
            display_name: name.replace('_', " "),
            count,
        });
    }

    /// Total inventory slots; free slots are `slots - stacks held`.
    pub fn set_slots(&self, slots: usize) {
        self.lock().slots = slots;
    }

    pub fn set_day(&self, is_day: bool) {
        self.lock().is_day = is_day;
    }

    pub fn occupy_bed(&self, pos: BlockPos) {
        self.lock().occupied_beds.insert(pos);
    }

    pub fn fail_deposits_of(&self, item: &str) {
        self.lock().failing_deposits.insert(item.to_string());
    }

    pub fn set_auto_reach(&self, auto_reach: bool) {
        self.lock().auto_reach = auto_reach;
    }

    /// Keep casts outstanding until the rod is reeled in with `activate_item`.
    pub fn hold_casts(&self, hold: bool) {
        self.lock().hold_casts = hold;
    }

    /// Morning: the agent gets out of bed and the wake signal fires.
    pub fn dawn(&self) {
        {
            let mut state = self.lock();
            state.is_day = true;
            state.sleeping = false;
        }
        self.emit(WorldEvent::Wake);
    }

    pub fn emit(&self, event: WorldEvent) {
        let _ = self.events.send(event);
    }

    // --- Inspection ---

    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    pub fn chats(&self) -> Vec<String> {
        self.lock()
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Chat(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn goals(&self) -> Vec<Goal> {
        self.lock()
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::SetGoal(goal) => Some(*goal),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Action) -> bool) -> usize {
        self.lock().actions.iter().filter(|a| pred(a)).count()
    }

    pub fn is_asleep(&self) -> bool {
        self.lock().sleeping
    }

    pub fn held_items(&self) -> Vec<ItemStack> {
        self.lock().items.clone()
    }
}

#[async_trait]
impl WorldClient for DebugWorld {
    fn username(&self) -> &str {
        &self.username
    }

    fn subscribe(&self) -> broadcast::Receiver<WorldEvent> {
        self.events.subscribe()
    }

    async fn chat(&self, text: &str) -> Result<()> {
        tracing::debug!(text = %text, "DebugWorld chat");
        self.record(Action::Chat(text.to_string()));
        Ok(())
    }

    async fn find_blocks(&self, query: &BlockQuery) -> Result<Vec<Block>> {
        let mut state = self.lock();
        state.actions.push(Action::FindBlocks(query.kinds.clone()));

        let origin = state.position;
        let mut found: Vec<(f64, Block)> = state
            .blocks
            .iter()
            .filter(|(_, kind)| query.kinds.iter().any(|k| k == *kind))
            .map(|(pos, kind)| {
                let center = Vec3::new(pos.x as f64 + 0.5, pos.y as f64 + 0.5, pos.z as f64 + 0.5);
                (
                    center.distance_to(origin),
                    Block {
                        pos: *pos,
                        kind: kind.clone(),
                    },
                )
            })
            .filter(|(distance, _)| *distance <= query.max_distance as f64)
            .collect();

        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(found
            .into_iter()
            .take(query.count)
            .map(|(_, block)| block)
            .collect())
    }

    async fn block_at(&self, pos: BlockPos) -> Result<Option<Block>> {
        let kind = self
            .lock()
            .blocks
            .get(&pos)
            .cloned()
            .unwrap_or_else(|| "air".to_string());
        Ok(Some(Block { pos, kind }))
    }

    async fn position(&self) -> Result<Vec3> {
        Ok(self.lock().position)
    }

    async fn player(&self, username: &str) -> Result<Option<Player>> {
        Ok(self.lock().players.get(username).cloned())
    }

    async fn is_day(&self) -> Result<bool> {
        Ok(self.lock().is_day)
    }

    async fn is_sleeping(&self) -> Result<bool> {
        Ok(self.lock().sleeping)
    }

    async fn look_at(&self, target: Vec3) -> Result<()> {
        self.record(Action::LookAt(target));
        Ok(())
    }

    async fn equip(&self, item: &str, _slot: EquipSlot) -> Result<()> {
        let mut state = self.lock();
        state.actions.push(Action::Equip(item.to_string()));
        if !state.items.iter().any(|i| i.name == item) {
            bail!("I don't have a {}!", item.replace('_', " "));
        }
        Ok(())
    }

    async fn cast(&self) -> Result<()> {
        let hold = {
            let mut state = self.lock();
            state.actions.push(Action::Cast);
            state.hold_casts
        };
        if hold {
            self.reel.notified().await;
            bail!("Fishing cancelled");
        }
        Ok(())
    }

    async fn activate_item(&self) -> Result<()> {
        self.record(Action::ActivateItem);
        self.reel.notify_waiters();
        Ok(())
    }

    async fn sleep(&self, bed: BlockPos) -> Result<()> {
        let mut state = self.lock();
        state.actions.push(Action::Sleep(bed));
        if state.occupied_beds.contains(&bed) {
            bail!("This bed is occupied");
        }
        if state.is_day {
            bail!("You can only sleep at night");
        }
        state.sleeping = true;
        Ok(())
    }

    async fn wake(&self) -> Result<()> {
        {
            let mut state = self.lock();
            state.actions.push(Action::Wake);
            state.sleeping = false;
        }
        self.emit(WorldEvent::Wake);
        Ok(())
    }

    async fn inventory(&self) -> Result<Inventory> {
        let state = self.lock();
        Ok(Inventory {
            items: state.items.clone(),
            empty_slots: state.slots.saturating_sub(state.items.len()),
        })
    }

    async fn open_container(&self, pos: BlockPos) -> Result<ContainerHandle> {
        let mut state = self.lock();
        state.actions.push(Action::OpenContainer(pos));
        match state.blocks.get(&pos) {
            Some(kind) if kind == "chest" => Ok(ContainerHandle(1)),
            _ => Err(anyhow!("no container at {pos}")),
        }
    }

    async fn deposit(&self, _container: ContainerHandle, item: &ItemStack) -> Result<()> {
        let mut state = self.lock();
        state.actions.push(Action::Deposit(item.name.clone(), item.count));
        if state.failing_deposits.contains(&item.name) {
            bail!("container rejected {}", item.name);
        }
        if let Some(idx) = state.items.iter().position(|i| i == item) {
            state.items.remove(idx);
        }
        Ok(())
    }

    async fn close_container(&self, _container: ContainerHandle) -> Result<()> {
        self.record(Action::CloseContainer);
        Ok(())
    }

    async fn draw_path(&self, points: &[Vec3]) -> Result<()> {
        self.record(Action::DrawPath(points.len()));
        Ok(())
    }
}

#[async_trait]
impl Pathfinder for DebugWorld {
    async fn set_goal(&self, goal: &Goal) -> Result<()> {
        let reached = {
            let mut state = self.lock();
            state.actions.push(Action::SetGoal(*goal));
            let target = match goal {
                Goal::Point { pos } | Goal::Proximity { pos, .. } => Some(*pos),
                _ => None,
            };
            match target {
                Some(pos) if state.auto_reach => {
                    state.position = Vec3::new(pos.x as f64 + 0.5, pos.y as f64, pos.z as f64 + 0.5);
                    true
                }
                _ => false,
            }
        };
        if reached {
            self.emit(WorldEvent::GoalReached);
        }
        Ok(())
    }

    async fn cancel_goal(&self) -> Result<()> {
        self.record(Action::CancelGoal);
        Ok(())
    }
}
