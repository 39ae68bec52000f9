use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub mod debug;

// --- 1. Geometry ---

/// Integer block coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub const fn above(self) -> Self {
        self.offset(0, 1, 0)
    }

    /// Point on top of the block, centered horizontally.
    pub fn top_center(self) -> Vec3 {
        Vec3::new(self.x as f64 + 0.5, self.y as f64 + 1.0, self.z as f64 + 0.5)
    }

    pub fn distance_to(self, other: BlockPos) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        let dz = (self.z - other.z) as f64;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.z)
    }
}

/// Continuous world coordinates (entity positions, look targets).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The block containing this point.
    pub fn block(self) -> BlockPos {
        BlockPos::new(self.x.floor() as i32, self.y.floor() as i32, self.z.floor() as i32)
    }

    pub fn distance_to(self, other: Vec3) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

// --- 2. World snapshots ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub pos: BlockPos,
    /// Block name, e.g. `water`, `air`, `red_bed`.
    pub kind: String,
}

/// Parameters of a nearest-first block search around the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockQuery {
    pub kinds: Vec<String>,
    pub max_distance: u32,
    pub count: usize,
}

impl BlockQuery {
    pub fn new(kinds: &[String], max_distance: u32, count: usize) -> Self {
        Self {
            kinds: kinds.to_vec(),
            max_distance,
            count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub username: String,
    pub entity_id: u32,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item name, e.g. `fishing_rod`, `cod`.
    pub name: String,
    pub display_name: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub items: Vec<ItemStack>,
    pub empty_slots: usize,
}

impl Inventory {
    pub fn is_full(&self) -> bool {
        self.empty_slots == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipSlot {
    Hand,
    OffHand,
}

/// Opaque handle of an opened container window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle(pub u32);

// --- 3. Navigation goals ---

/// Navigation target handed to the pathfinder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Goal {
    /// Stand exactly on `pos`.
    Point { pos: BlockPos },
    /// Get within `radius` blocks of `pos`.
    Proximity { pos: BlockPos, radius: u32 },
    /// Keep within `radius` of a moving entity. Never "reached".
    FollowEntity { entity_id: u32, radius: u32 },
    /// Stop moving.
    Cancel,
}

impl Goal {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Goal::FollowEntity { .. })
    }
}

// --- 4. Events ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStats {
    pub path: Vec<Vec3>,
    pub time_ms: f64,
    pub visited_nodes: u64,
    pub status: String,
}

impl PathStats {
    /// Nodes visited per game tick (50 ms).
    pub fn nodes_per_tick(&self) -> f64 {
        if self.time_ms <= 0.0 {
            return 0.0;
        }
        self.visited_nodes as f64 * 50.0 / self.time_ms
    }
}

/// Asynchronous signals emitted by the world client and the pathfinder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorldEvent {
    Spawn,
    Chat { username: String, message: String },
    /// An item entity was picked up. `by_self` is true when the agent collected it.
    ItemCollected { by_self: bool, item: String },
    Kicked { reason: String },
    Wake,
    DayNightChanged { is_day: bool },
    GoalReached,
    PathFailed { reason: String },
    PathUpdate(PathStats),
    EntityHurt { is_self: bool },
    /// Click in the visualization sink. Button 2 is the right mouse button.
    BlockClicked { pos: BlockPos, button: u8 },
}

// --- 5. Collaborator traits ---

/// The connected world client: world queries and primitive actions.
///
/// Implemented by the protocol bridge in the agent binary and by
/// [`debug::DebugWorld`] for tests.
#[async_trait]
pub trait WorldClient: Send + Sync {
    /// The agent's own username.
    fn username(&self) -> &str;

    /// Subscribe to world and pathfinder events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<WorldEvent>;

    async fn chat(&self, text: &str) -> Result<()>;

    /// Blocks matching `query`, nearest to the agent first.
    async fn find_blocks(&self, query: &BlockQuery) -> Result<Vec<Block>>;

    /// The block at `pos`, or `None` when the chunk is not loaded.
    async fn block_at(&self, pos: BlockPos) -> Result<Option<Block>>;

    async fn position(&self) -> Result<Vec3>;

    async fn player(&self, username: &str) -> Result<Option<Player>>;

    async fn is_day(&self) -> Result<bool>;

    async fn is_sleeping(&self) -> Result<bool>;

    async fn look_at(&self, target: Vec3) -> Result<()>;

    async fn equip(&self, item: &str, slot: EquipSlot) -> Result<()>;

    /// Cast the held rod. Resolves when the line is reeled in with a bite;
    /// fails when the cast is interrupted.
    async fn cast(&self) -> Result<()>;

    /// Use the held item (right click). Reels in an outstanding cast.
    async fn activate_item(&self) -> Result<()>;

    async fn sleep(&self, bed: BlockPos) -> Result<()>;

    async fn wake(&self) -> Result<()>;

    async fn inventory(&self) -> Result<Inventory>;

    async fn open_container(&self, pos: BlockPos) -> Result<ContainerHandle>;

    async fn deposit(&self, container: ContainerHandle, item: &ItemStack) -> Result<()>;

    async fn close_container(&self, container: ContainerHandle) -> Result<()>;

    /// Draw the planned path in the visualization sink, if one is attached.
    async fn draw_path(&self, _points: &[Vec3]) -> Result<()> {
        Ok(())
    }
}

/// The pathfinding collaborator. Progress comes back as
/// [`WorldEvent::GoalReached`], [`WorldEvent::PathFailed`] and
/// [`WorldEvent::PathUpdate`] on the world event stream.
#[async_trait]
pub trait Pathfinder: Send + Sync {
    async fn set_goal(&self, goal: &Goal) -> Result<()>;

    async fn cancel_goal(&self) -> Result<()>;
}
