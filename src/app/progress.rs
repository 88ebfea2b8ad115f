// Progress - Ordered stage events for one conversion

use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::domain::model::{ProgressEvent, Stage};
use crate::ports::ProgressSink;

/// Forwards progress events to the caller's channel.
///
/// Stages only move forward, the percent within a stage never goes back,
/// and once `Complete` or `Failed` went out nothing else is sent. Events
/// that would break this are dropped. A closed receiver is not an error.
pub struct ProgressEmitter {
    tx: Option<UnboundedSender<ProgressEvent>>,
    last: Mutex<Option<ProgressEvent>>,
}

impl ProgressEmitter {
    pub fn new(tx: Option<UnboundedSender<ProgressEvent>>) -> Self {
        Self {
            tx,
            last: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn emit(&self, stage: Stage, percent: u8) {
        let event = ProgressEvent::new(stage, percent);
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = *last {
            let accepted = !previous.stage.is_terminal()
                && (event.stage > previous.stage
                    || (event.stage == previous.stage && event.percent > previous.percent));
            if !accepted {
                return;
            }
        }

        *last = Some(event);
        trace!(stage = %event.stage, percent = event.percent, "Progress");
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Latest event that was accepted
    pub fn last(&self) -> Option<ProgressEvent> {
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sink that reports encoder fractions as percent of `stage`
    pub fn stage_sink(&self, stage: Stage) -> StageProgress<'_> {
        StageProgress {
            emitter: self,
            stage,
        }
    }
}

pub struct StageProgress<'a> {
    emitter: &'a ProgressEmitter,
    stage: Stage,
}

impl ProgressSink for StageProgress<'_> {
    fn report(&self, fraction: f64) {
        if !fraction.is_finite() {
            return;
        }
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u8;
        self.emitter.emit(self.stage, percent);
    }
}
