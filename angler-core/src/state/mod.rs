use serde::Serialize;

use crate::subscription::Subscription;

/// The single exclusive activity the agent is performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    Fishing,
    /// Looking for a bed, walking to it, or asleep.
    Sleeping,
    Storing,
    Navigating,
    Following,
}

/// Where the fishing loop is within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FishingPhase {
    Stopped,
    Searching,
    Traveling,
    /// Equipping the rod and letting movement settle.
    Equipping,
    /// Line in the water, waiting for a bite.
    Casting,
    /// Reeled in, waiting for the catch to be collected.
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgentState {
    pub mode: Mode,
    /// Fishing was interrupted by sleep or storage and should restart afterwards.
    pub should_resume_fishing: bool,
    pub using_viewer: bool,
}

/// What a transition does with the resume flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Set the flag if fishing is being interrupted; keep an already pending resume.
    Remember,
    /// Clear the flag.
    Forget,
}

/// Snapshot of the activity a transition superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted {
    pub mode: Mode,
    pub phase: FishingPhase,
}

impl Interrupted {
    /// The fishing line is in the water and must be reeled in.
    ///
    /// Only during `Casting`: once the cast resolves the line is already back,
    /// and using the rod again would throw a new one.
    pub fn line_out(&self) -> bool {
        self.mode == Mode::Fishing && self.phase == FishingPhase::Casting
    }

    /// The pathfinder may still be moving the agent.
    pub fn may_be_moving(&self) -> bool {
        match self.mode {
            Mode::Idle => false,
            Mode::Fishing => self.phase == FishingPhase::Traveling,
            _ => true,
        }
    }
}

/// Agent state plus the task currently acting on it.
///
/// Every method is a synchronous read-modify-write; callers hold the lock for
/// the duration of one call and never across an `.await`.
#[derive(Debug)]
pub(crate) struct Control {
    state: AgentState,
    phase: FishingPhase,
    epoch: u64,
    active: Option<Subscription>,
}

impl Control {
    pub(crate) fn new(using_viewer: bool) -> Self {
        Self {
            state: AgentState {
                mode: Mode::Idle,
                should_resume_fishing: false,
                using_viewer,
            },
            phase: FishingPhase::Stopped,
            epoch: 0,
            active: None,
        }
    }

    pub(crate) fn state(&self) -> AgentState {
        self.state
    }

    pub(crate) fn phase(&self) -> FishingPhase {
        self.phase
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Cancel the active task and switch to `mode`.
    ///
    /// Returns the new epoch and what was superseded. The caller attaches the
    /// task for the new mode with [`Control::attach`].
    pub(crate) fn begin(&mut self, mode: Mode, resume: Resume) -> (u64, Interrupted) {
        if let Some(mut task) = self.active.take() {
            task.cancel();
        }

        let interrupted = Interrupted {
            mode: self.state.mode,
            phase: self.phase,
        };

        self.state.should_resume_fishing = match resume {
            Resume::Remember => {
                interrupted.mode == Mode::Fishing || self.state.should_resume_fishing
            }
            Resume::Forget => false,
        };
        self.state.mode = mode;
        self.phase = FishingPhase::Stopped;
        self.epoch += 1;

        tracing::debug!(
            from = ?interrupted.mode,
            to = ?mode,
            epoch = self.epoch,
            resume = self.state.should_resume_fishing,
            "mode transition"
        );
        (self.epoch, interrupted)
    }

    pub(crate) fn attach(&mut self, epoch: u64, task: Subscription) {
        if epoch == self.epoch {
            self.active = Some(task);
        }
        // A stale task is dropped here, which cancels it.
    }

    pub(crate) fn enter_phase(&mut self, epoch: u64, phase: FishingPhase) -> bool {
        if epoch != self.epoch || self.state.mode != Mode::Fishing {
            return false;
        }
        tracing::trace!(?phase, epoch, "fishing phase");
        self.phase = phase;
        true
    }

    /// The task of `epoch` is done; fall back to Idle. The task handle stays
    /// attached so a pending resume delay remains cancellable.
    pub(crate) fn finish(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.state.mode = Mode::Idle;
        self.phase = FishingPhase::Stopped;
        true
    }

    /// Whether the task of `epoch` should hand over to the fishing loop.
    pub(crate) fn resume_requested(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.state.should_resume_fishing
    }

    /// Cancel everything and go Idle for good.
    pub(crate) fn shutdown(&mut self) {
        if let Some(mut task) = self.active.take() {
            task.cancel();
        }
        self.state.mode = Mode::Idle;
        self.phase = FishingPhase::Stopped;
        self.epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remember_only_when_fishing_was_interrupted() {
        let mut control = Control::new(false);
        control.begin(Mode::Storing, Resume::Remember);
        assert!(!control.state().should_resume_fishing);

        control.begin(Mode::Fishing, Resume::Forget);
        let (_, interrupted) = control.begin(Mode::Sleeping, Resume::Remember);
        assert_eq!(interrupted.mode, Mode::Fishing);
        assert!(control.state().should_resume_fishing);

        // Chained interruption keeps the pending resume.
        control.begin(Mode::Storing, Resume::Remember);
        assert!(control.state().should_resume_fishing);

        control.begin(Mode::Navigating, Resume::Forget);
        assert!(!control.state().should_resume_fishing);
    }

    #[test]
    fn test_stale_epoch_is_ignored() {
        let mut control = Control::new(false);
        let (old, _) = control.begin(Mode::Fishing, Resume::Forget);
        assert!(control.enter_phase(old, FishingPhase::Casting));

        let (new, interrupted) = control.begin(Mode::Sleeping, Resume::Remember);
        assert!(interrupted.line_out());
        assert!(!control.enter_phase(old, FishingPhase::Searching));
        assert!(!control.finish(old));
        assert_eq!(control.state().mode, Mode::Sleeping);

        assert!(control.finish(new));
        assert_eq!(control.state().mode, Mode::Idle);
        assert!(control.resume_requested(new));
        assert!(!control.resume_requested(old));
    }

    #[test]
    fn test_phase_only_moves_while_fishing() {
        let mut control = Control::new(true);
        let (epoch, _) = control.begin(Mode::Storing, Resume::Forget);
        assert!(!control.enter_phase(epoch, FishingPhase::Searching));
        assert_eq!(control.phase(), FishingPhase::Stopped);
        assert!(control.state().using_viewer);
    }

    #[test]
    fn test_interrupted_motion() {
        let idle = Interrupted { mode: Mode::Idle, phase: FishingPhase::Stopped };
        let traveling = Interrupted { mode: Mode::Fishing, phase: FishingPhase::Traveling };
        let casting = Interrupted { mode: Mode::Fishing, phase: FishingPhase::Casting };
        assert!(!idle.may_be_moving());
        assert!(traveling.may_be_moving() && !traveling.line_out());
        assert!(!casting.may_be_moving() && casting.line_out());
    }
}
