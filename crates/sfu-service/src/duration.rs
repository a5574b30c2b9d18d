//! Billable duration of a conference.
//!
//! Only participants that have left count. Each contributes
//! `removed_at - added_at`; the sum is rounded up to whole minutes.

use crate::registry::ParticipantState;

const MILLIS_PER_MINUTE: u64 = 60_000;

/// Billable minutes for the given participants.
///
/// Participants without a removal time contribute nothing. A removal stamped
/// before the addition (clock step) contributes zero rather than a negative.
pub fn billable_minutes<'a>(participants: impl IntoIterator<Item = &'a ParticipantState>) -> u64 {
    let total_ms: u64 = participants
        .into_iter()
        .filter_map(|participant| {
            let removed_at = participant.removed_at?;
            let elapsed = (removed_at - participant.added_at).num_milliseconds();
            u64::try_from(elapsed).ok()
        })
        .fold(0u64, u64::saturating_add);

    total_ms.div_ceil(MILLIS_PER_MINUTE)
}
