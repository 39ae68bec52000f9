//! Behavior Coordinator
//!
//! Owns the agent state and the one behavior task that acts on it. Commands
//! (chat or console) and automatic triggers (full inventory, nightfall, kick)
//! all funnel through here; every mode change aborts the superseded task
//! before the next one is spawned.

mod dispatch;
mod events;

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::BehaviorConfig;
use crate::error::BehaviorError;
use crate::fishing;
use crate::navigation::{NavOutcome, NavigationController};
use crate::sleep;
use crate::state::{AgentState, Control, FishingPhase, Interrupted, Mode, Resume};
use crate::storage;
use crate::subscription::Subscription;
use crate::world::{Goal, Pathfinder, WorldClient};

pub use dispatch::Dispatch;

/// Automatic signals raised by behaviors or the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// No free inventory slot left at the start of a fishing cycle.
    InventoryFull,
    Nightfall,
    /// Removed from the world; the coordinator shuts down for good.
    Kicked { reason: String },
}

struct Inner {
    world: Arc<dyn WorldClient>,
    nav: NavigationController,
    config: BehaviorConfig,
    prefix: String,
    control: Mutex<Control>,
    /// Sleep poller and event pump.
    services: Mutex<Vec<Subscription>>,
    shutdown: watch::Sender<Option<String>>,
}

/// Cheap to clone; all clones drive the same agent.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("username", &self.inner.world.username())
            .field("prefix", &self.inner.prefix)
            .field("state", &self.state())
            .field("nav", &self.inner.nav)
            .finish()
    }
}

impl Coordinator {
    pub fn new(
        world: Arc<dyn WorldClient>,
        pathfinder: Arc<dyn Pathfinder>,
        config: BehaviorConfig,
        prefix: impl Into<String>,
        using_viewer: bool,
    ) -> Self {
        let (shutdown, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                nav: NavigationController::new(world.clone(), pathfinder),
                world,
                config,
                prefix: prefix.into(),
                control: Mutex::new(Control::new(using_viewer)),
                services: Mutex::new(Vec::new()),
                shutdown,
            }),
        }
    }

    /// Start the sleep poller and the world event pump.
    ///
    /// Must be called from within a tokio runtime. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut services = self.lock_services();
        if !services.is_empty() || self.is_shut_down() {
            return;
        }

        // Subscribe here so no event emitted after `start` returns is missed.
        let events = self.inner.world.subscribe();
        services.push(Subscription::spawn(
            "event-pump",
            events::pump(self.clone(), events),
        ));
        services.push(Subscription::spawn("sleep-poller", sleep::poll(self.clone())));

        info!(
            username = %self.username(),
            prefix = %self.inner.prefix,
            using_viewer = self.state().using_viewer,
            "coordinator started"
        );
    }

    pub fn state(&self) -> AgentState {
        self.lock_control().state()
    }

    pub fn mode(&self) -> Mode {
        self.state().mode
    }

    pub fn fishing_phase(&self) -> FishingPhase {
        self.lock_control().phase()
    }

    pub fn username(&self) -> &str {
        self.inner.world.username()
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    pub fn config(&self) -> &BehaviorConfig {
        &self.inner.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.borrow().is_some()
    }

    /// Resolves with the shutdown reason once the agent has been kicked or
    /// the world connection closed.
    pub async fn closed(&self) -> String {
        let mut rx = self.inner.shutdown.subscribe();
        loop {
            let reason = rx.borrow_and_update().clone();
            if let Some(reason) = reason {
                return reason;
            }
            if rx.changed().await.is_err() {
                return "coordinator dropped".to_string();
            }
        }
    }

    /// React to an automatic trigger. Returns whether it changed anything.
    pub async fn handle_trigger(&self, trigger: Trigger) -> bool {
        if self.is_shut_down() {
            return false;
        }
        debug!(?trigger, mode = ?self.mode(), "trigger");

        match trigger {
            Trigger::InventoryFull => {
                self.say("My inventory is full! Storing in the closest chest!")
                    .await;
                self.store_catches(false).await
            }
            Trigger::Nightfall => self.begin_sleep().await,
            Trigger::Kicked { reason } => {
                info!(reason = %reason, "Kicked: {reason}");
                self.shutdown(reason);
                true
            }
        }
    }

    /// Enter the fishing loop. No-op while already fishing.
    pub fn start_fishing(&self) -> bool {
        self.activate(
            Mode::Fishing,
            Resume::Forget,
            |state| state.mode != Mode::Fishing,
            "fishing",
            |act| Box::pin(fishing::run(act)),
        )
    }

    /// Leave the fishing loop: reel in, stop walking to the spot, go Idle.
    /// No-op unless fishing.
    pub fn stop_fishing(&self) -> bool {
        self.activate(
            Mode::Idle,
            Resume::Forget,
            |state| state.mode == Mode::Fishing,
            "stop-fishing",
            |act| {
                Box::pin(async move {
                    act.settle().await;
                    if act.interrupted().may_be_moving() {
                        act.nav().cancel().await;
                    }
                    act.finish();
                })
            },
        )
    }

    /// Deposit everything but the tool (or everything, with `store_all`) into
    /// the nearest chest.
    ///
    /// Nothing to store leaves the current activity untouched. Fishing that
    /// gets interrupted resumes afterwards unless `store_all` is set.
    pub async fn store_catches(&self, store_all: bool) -> bool {
        let inventory = match self.inner.world.inventory().await {
            Ok(inventory) => inventory,
            Err(e) => {
                warn!(error = %e, "could not read inventory");
                return false;
            }
        };

        let items = storage::eligible_items(&inventory, &self.inner.config.tool_item, store_all);
        if items.is_empty() {
            self.say("I don't have anything to store!").await;
            return false;
        }

        let resume = if store_all {
            Resume::Forget
        } else {
            Resume::Remember
        };
        self.activate(
            Mode::Storing,
            resume,
            |_| true,
            "storage",
            move |act| Box::pin(storage::run(act, items)),
        )
    }

    /// Run the bed routine. Fishing that gets interrupted resumes after waking.
    ///
    /// Beds are looked up first: with none in range the notice is posted and
    /// the current activity carries on.
    pub async fn begin_sleep(&self) -> bool {
        if self.mode() == Mode::Sleeping {
            return false;
        }
        let beds = match sleep::find_beds(self.inner.world.as_ref(), &self.inner.config).await {
            Ok(beds) => beds,
            Err(e) => {
                warn!(error = %e, "bed search failed");
                return false;
            }
        };
        if beds.is_empty() {
            self.say("I can't find a suitable bed!").await;
            return false;
        }

        self.activate(
            Mode::Sleeping,
            Resume::Remember,
            |state| state.mode != Mode::Sleeping,
            "sleep",
            move |act| Box::pin(sleep::run(act, beds)),
        )
    }

    /// Raise [`Trigger::Nightfall`] when it is night, the agent is awake and
    /// no bed routine is running.
    pub(crate) async fn check_nightfall(&self) {
        if self.mode() == Mode::Sleeping {
            return;
        }
        let world = &self.inner.world;
        let is_day = match world.is_day().await {
            Ok(is_day) => is_day,
            Err(e) => {
                debug!(error = %e, "time-of-day check failed");
                return;
            }
        };
        if is_day {
            return;
        }
        match world.is_sleeping().await {
            Ok(false) => {
                self.handle_trigger(Trigger::Nightfall).await;
            }
            Ok(true) => {}
            Err(e) => debug!(error = %e, "sleep-state check failed"),
        }
    }

    pub async fn say(&self, text: &str) {
        if let Err(e) = self.inner.world.chat(text).await {
            warn!(error = %e, text, "chat failed");
        }
    }

    /// Switch to `mode` if `admit` accepts the current state, and spawn the
    /// behavior for it. The superseded task is aborted before `behavior` runs.
    fn activate<F>(
        &self,
        mode: Mode,
        resume: Resume,
        admit: impl FnOnce(&AgentState) -> bool,
        label: &'static str,
        behavior: F,
    ) -> bool
    where
        F: FnOnce(Activation) -> BoxFuture<'static, ()>,
    {
        if self.is_shut_down() {
            return false;
        }

        let mut control = self.lock_control();
        if !admit(&control.state()) {
            debug!(to = ?mode, from = ?control.state().mode, "transition not admitted");
            return false;
        }

        let (epoch, interrupted) = control.begin(mode, resume);
        let act = Activation {
            coord: self.clone(),
            epoch,
            interrupted,
        };
        control.attach(epoch, Subscription::spawn(label, behavior(act)));
        true
    }

    fn shutdown(&self, reason: String) {
        self.lock_control().shutdown();
        self.inner.shutdown.send_replace(Some(reason));

        let services: Vec<Subscription> = self.lock_services().drain(..).collect();
        for mut service in services {
            service.cancel();
        }
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.inner
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_services(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.inner
            .services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// What a behavior task gets when its mode is entered: access to the agent
/// and the epoch that tells it whether it is still the current behavior.
pub(crate) struct Activation {
    coord: Coordinator,
    epoch: u64,
    interrupted: Interrupted,
}

impl Activation {
    pub(crate) fn world(&self) -> &dyn WorldClient {
        self.coord.inner.world.as_ref()
    }

    pub(crate) fn nav(&self) -> &NavigationController {
        &self.coord.inner.nav
    }

    pub(crate) fn config(&self) -> &BehaviorConfig {
        &self.coord.inner.config
    }

    pub(crate) fn coordinator(&self) -> &Coordinator {
        &self.coord
    }

    pub(crate) fn interrupted(&self) -> Interrupted {
        self.interrupted
    }

    pub(crate) async fn say(&self, text: &str) {
        self.coord.say(text).await;
    }

    pub(crate) fn is_current(&self) -> bool {
        self.coord.lock_control().epoch() == self.epoch
    }

    pub(crate) fn enter_phase(&self, phase: FishingPhase) -> bool {
        self.coord.lock_control().enter_phase(self.epoch, phase)
    }

    /// Fall back to Idle. Returns false when another behavior already took over.
    pub(crate) fn finish(&self) -> bool {
        self.coord.lock_control().finish(self.epoch)
    }

    pub(crate) fn resume_requested(&self) -> bool {
        self.coord.lock_control().resume_requested(self.epoch)
    }

    /// Restart the fishing loop if the interrupted fishing should resume.
    pub(crate) fn resume_fishing(&self) -> bool {
        if !self.resume_requested() {
            return false;
        }
        info!("resuming fishing");
        self.coord.start_fishing()
    }

    /// Clean up after the superseded behavior: reel in a line that is still
    /// out and tell players fishing stopped.
    pub(crate) async fn settle(&self) {
        let interrupted = self.interrupted;
        if interrupted.line_out() {
            if let Err(e) = self.world().activate_item().await {
                warn!(error = %e, "reel in failed");
            }
        }
        if interrupted.mode == Mode::Fishing && interrupted.phase != FishingPhase::Stopped {
            self.say("Stopped fishing!").await;
        }
    }

    /// Walk to `goal` and wait for the outcome.
    pub(crate) async fn travel(&self, goal: Goal) -> Result<(), BehaviorError> {
        match self.nav().set_goal(goal).await {
            NavOutcome::Reached => Ok(()),
            NavOutcome::Cancelled => Err(BehaviorError::action(
                "travel",
                "I was stopped on the way!",
            )),
            NavOutcome::Failed(reason) => Err(BehaviorError::action(
                "travel",
                format!("I can't get there: {reason}"),
            )),
        }
    }

    /// End the behavior with a chat notice, unless it was already superseded.
    pub(crate) async fn fail(&self, err: BehaviorError) {
        if !self.finish() {
            debug!(error = %err, "superseded behavior failed");
            return;
        }
        warn!(error = %err, epoch = self.epoch, "behavior failed");
        self.say(&err.notice()).await;
    }
}
