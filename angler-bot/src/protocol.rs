//! Wire format of the world bridge: newline-delimited JSON over TCP.
//!
//! Requests carry an `id` and an `op`; the bridge answers each one with a
//! reply echoing the `id`. World and pathfinder events arrive unsolicited on
//! the same stream, tagged with `event`.

use angler_core::world::{BlockPos, ContainerHandle, EquipSlot, Goal, ItemStack, Vec3};
use angler_core::WorldEvent;
use serde::{Deserialize, Serialize};

// --- 1. Agent -> bridge ---
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub id: u64,
    #[serde(flatten)]
    pub op: Op<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op<'a> {
    /// First request on a fresh stream: join the world.
    Connect {
        host: &'a str,
        port: u16,
        username: &'a str,
        viewer_port: Option<u16>,
    },
    Chat {
        text: &'a str,
    },
    FindBlocks {
        kinds: &'a [String],
        max_distance: u32,
        count: usize,
    },
    BlockAt {
        pos: BlockPos,
    },
    Position,
    Player {
        username: &'a str,
    },
    IsDay,
    IsSleeping,
    LookAt {
        target: Vec3,
    },
    Equip {
        item: &'a str,
        destination: EquipSlot,
    },
    Cast,
    ActivateItem,
    Sleep {
        bed: BlockPos,
    },
    Wake,
    Inventory,
    OpenContainer {
        pos: BlockPos,
    },
    Deposit {
        container: ContainerHandle,
        item: &'a ItemStack,
    },
    CloseContainer {
        container: ContainerHandle,
    },
    DrawPath {
        points: &'a [Vec3],
    },
    SetGoal {
        goal: &'a Goal,
    },
    CancelGoal,
}

// --- 2. Bridge -> agent ---
#[derive(Debug, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Reply(Reply),
    Event(WorldEvent),
}
