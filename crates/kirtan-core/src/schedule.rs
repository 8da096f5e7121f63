//! Time-of-day stream selection.
//!
//! Pure lookups over the catalog's schedule table; the daemon drives
//! re-evaluation with a periodic tick into the player loop.

use crate::catalog::{Catalog, ScheduleEntry, StreamDescriptor};

/// First schedule entry (catalog order) whose range contains `hour`.
/// Falls back to the first entry when nothing matches, so a non-exhaustive
/// schedule still yields an answer.  `None` only for an empty schedule.
pub fn scheduled_entry(catalog: &Catalog, hour: u32) -> Option<&ScheduleEntry> {
    let schedule = catalog.schedule();
    schedule
        .iter()
        .find(|entry| entry.contains(hour))
        .or_else(|| schedule.first())
}

/// The stream the schedule selects for `hour`, with the entry that chose it.
pub fn scheduled_stream(catalog: &Catalog, hour: u32) -> Option<(&StreamDescriptor, &ScheduleEntry)> {
    let entry = scheduled_entry(catalog, hour)?;
    catalog
        .stream_by_id(&entry.stream_id)
        .map(|stream| (stream, entry))
}
