use crate::results::{EpochReport, TrainStartInfo};

/// What the engine should do after a hook returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookAction {
    #[default]
    Continue,
    /// Finish the current epoch and return from `train`.
    Stop,
}

/// Hooks the engine invokes from inside the blocking `train` call.
///
/// Calls arrive on whatever thread the engine trains on; implementations must
/// be cheap or bounded.
pub trait TrainingCallbacks: Send + Sync {
    fn on_start(&self, info: &TrainStartInfo);

    fn on_epoch_end(&self, report: &EpochReport) -> HookAction;
}

#[derive(Debug, Default)]
pub struct NoopCallbacks;

impl TrainingCallbacks for NoopCallbacks {
    fn on_start(&self, _info: &TrainStartInfo) {}

    fn on_epoch_end(&self, _report: &EpochReport) -> HookAction {
        HookAction::Continue
    }
}
