use std::env;
use std::time::Duration;

const BED_KINDS: [&str; 16] = [
    "white_bed",
    "orange_bed",
    "magenta_bed",
    "light_blue_bed",
    "yellow_bed",
    "lime_bed",
    "pink_bed",
    "gray_bed",
    "light_gray_bed",
    "cyan_bed",
    "purple_bed",
    "blue_bed",
    "brown_bed",
    "green_bed",
    "red_bed",
    "black_bed",
];

/// Timings, search radii and block/item names used by the behaviors.
#[derive(Debug, Clone)]
pub struct BehaviorConfig {
    /// The tool kept in the inventory when storing and equipped for fishing.
    pub tool_item: String,
    pub water_kind: String,
    pub air_kind: String,
    pub container_kind: String,
    pub bed_kinds: Vec<String>,

    /// Settling delay between equipping the rod and casting.
    pub cast_grace: Duration,
    /// How long to wait for the catch after reeling in.
    pub catch_timeout: Duration,
    pub sleep_poll_interval: Duration,
    /// Delay before fishing restarts after waking up.
    pub wake_resume_delay: Duration,

    pub water_search_radius: u32,
    pub bed_search_radius: u32,
    pub bed_candidates: usize,
    pub container_search_radius: u32,

    pub goto_radius: u32,
    pub follow_radius: u32,
    pub container_reach: u32,
    pub bed_reach: u32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            tool_item: "fishing_rod".to_string(),
            water_kind: "water".to_string(),
            air_kind: "air".to_string(),
            container_kind: "chest".to_string(),
            bed_kinds: BED_KINDS.iter().map(|s| s.to_string()).collect(),
            cast_grace: Duration::from_millis(100),
            catch_timeout: Duration::from_millis(2_000),
            sleep_poll_interval: Duration::from_millis(5_000),
            wake_resume_delay: Duration::from_millis(500),
            water_search_radius: 16,
            bed_search_radius: 8,
            bed_candidates: 10,
            container_search_radius: 32,
            goto_radius: 1,
            follow_radius: 3,
            container_reach: 4,
            bed_reach: 1,
        }
    }
}

impl BehaviorConfig {
    /// Defaults overridden by `ANGLER_*` environment variables.
    ///
    /// Durations are in milliseconds. Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            tool_item: env::var("ANGLER_TOOL_ITEM").unwrap_or(defaults.tool_item),
            container_kind: env::var("ANGLER_CONTAINER_KIND").unwrap_or(defaults.container_kind),
            cast_grace: env_millis("ANGLER_CAST_GRACE_MS", defaults.cast_grace),
            catch_timeout: env_millis("ANGLER_CATCH_TIMEOUT_MS", defaults.catch_timeout),
            sleep_poll_interval: env_millis("ANGLER_SLEEP_POLL_MS", defaults.sleep_poll_interval),
            wake_resume_delay: env_millis("ANGLER_WAKE_RESUME_MS", defaults.wake_resume_delay),
            water_search_radius: env_parse("ANGLER_WATER_RADIUS", defaults.water_search_radius),
            bed_search_radius: env_parse("ANGLER_BED_RADIUS", defaults.bed_search_radius),
            container_search_radius: env_parse(
                "ANGLER_CONTAINER_RADIUS",
                defaults.container_search_radius,
            ),
            ..defaults
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
