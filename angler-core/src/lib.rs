//! angler-core
//!
//! Behavior coordination engine for an autonomous fishing agent: the command
//! parser, the world/pathfinder collaborator traits, and the behaviors the
//! [`coordinator::Coordinator`] arbitrates between (fishing, sleeping,
//! storing, navigating, following).
//!
//! The engine assumes a single-threaded cooperative tokio runtime
//! (`current_thread`). Behaviors run as spawned tasks owned by the
//! coordinator; a mode transition aborts the superseded task before the next
//! one performs any world action.

pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fishing;
pub mod navigation;
pub mod sleep;
pub mod state;
pub mod storage;
pub mod subscription;
pub mod world;

pub use command::{parse_command, strip_chat_prefix, Command, ParseError};
pub use config::BehaviorConfig;
pub use coordinator::{Coordinator, Dispatch, Trigger};
pub use error::BehaviorError;
pub use navigation::{NavOutcome, NavigationController};
pub use state::{AgentState, FishingPhase, Mode};
pub use world::{Goal, Pathfinder, WorldClient, WorldEvent};
