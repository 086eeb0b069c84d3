use std::any::Any;

use crate::JobStatus;
use crate::engine::pump::PumpOutcome;

/// Terminal status for a finished pass. A cancel that was pending while the pass failed wins.
pub fn final_status(outcome: &PumpOutcome, cancel_requested: bool) -> JobStatus {
    match outcome {
        PumpOutcome::Completed => JobStatus::IdsPublished,
        PumpOutcome::Cancelled => JobStatus::IdPublishingCancelled,
        _ => failure_status(cancel_requested),
    }
}

/// Status for a pass that errored or panicked outside the pump.
pub fn failure_status(cancel_requested: bool) -> JobStatus {
    if cancel_requested {
        JobStatus::IdPublishingCancelled
    } else {
        JobStatus::Failed
    }
}

/// Message carried by a caught panic.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
