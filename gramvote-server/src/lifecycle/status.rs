//! Pure boundary-driven status function.
//!
//! The bulk SQL in the store mirrors this table; the two are
//! cross-checked in the store tests.

use chrono::NaiveDateTime;

use crate::model::{ElectionStatus, EventWindows};

/// Status an election should hold at `now` given its event boundaries,
/// or `None` while `now` is still before the nomination window (the
/// election keeps its creation-time status).
pub fn status_for(windows: &EventWindows, now: NaiveDateTime) -> Option<ElectionStatus> {
    if now >= windows.voting_end {
        Some(ElectionStatus::Completed)
    } else if now >= windows.voting_start {
        Some(ElectionStatus::Active)
    } else if now >= windows.nomination_end {
        Some(ElectionStatus::ReadyForPoll)
    } else if now >= windows.nomination_start {
        Some(ElectionStatus::NominationOpen)
    } else {
        None
    }
}
