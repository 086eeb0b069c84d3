//! Progress display for `reindex start --wait`.

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

pub type ProgressBar = Arc<Mutex<Bar>>;

/// Counter for an unknown total (shows count and rate, no percentage).
pub fn create_counter(desc: &'static str) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = 0,
        desc = desc,
        animation = Animation::Classic,
        position = 0,
        unit = " events"
    )))
}

/// Move the counter to an absolute value (polled progress only ever grows).
pub fn set_counter(pb: &ProgressBar, n: u64) {
    if let Ok(mut bar) = pb.try_lock() {
        let n = usize::try_from(n).unwrap_or(usize::MAX);
        if n > bar.counter {
            let _ = bar.update_to(n);
        }
    }
}

/// Final refresh so the last value stays on screen.
pub fn finish_counter(pb: &ProgressBar, n: u64) {
    if let Ok(mut bar) = pb.lock() {
        let _ = bar.update_to(usize::try_from(n).unwrap_or(usize::MAX));
        let _ = bar.refresh();
        eprintln!();
    }
}
