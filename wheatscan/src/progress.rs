//! Global progress bar management.
//!
//! One `MultiProgress` is shared by the whole process so the logger can suspend
//! drawing while it prints, without threading the instance through every call.

use indicatif::{MultiProgress, ProgressBar};
use once_cell::sync::Lazy;
use std::sync::Arc;

static MULTI: Lazy<Arc<MultiProgress>> = Lazy::new(|| Arc::new(MultiProgress::new()));

pub fn global_mp() -> Arc<MultiProgress> {
    MULTI.clone()
}

pub fn add_progress_bar(pb: ProgressBar) {
    global_mp().add(pb);
}

pub fn remove_progress_bar(pb: &ProgressBar) {
    global_mp().remove(pb);
}

/// Clear `pb` from the terminal and detach it.
pub fn finish_and_remove(pb: Option<ProgressBar>) {
    if let Some(pb) = pb {
        pb.finish_and_clear();
        remove_progress_bar(&pb);
    }
}
