//! Consecutive-day pattern tracking.
//!
//! The tracker itself is timezone-agnostic: it consumes explicit
//! `[start, end)` day windows and a per-day predicate. Deriving those
//! windows from the organization's UTC offset happens in
//! [`trailing_day_windows`], so tests can hand-build windows directly.

use chrono::{DateTime, Days, Duration, FixedOffset, TimeZone, Utc};

use crate::error::Result;

/// Half-open `[start, end)` range covering one calendar day in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Builds the `days` trailing calendar-day windows ending at `as_of`'s
/// day inclusive, oldest first, using the organization's UTC offset to
/// place day boundaries.
pub fn trailing_day_windows(
    as_of: DateTime<Utc>,
    days: u32,
    offset: FixedOffset,
) -> Vec<DayWindow> {
    let local_date = as_of.with_timezone(&offset).date_naive();
    let offset_secs = i64::from(offset.local_minus_utc());

    (0..days)
        .rev()
        .filter_map(|back| {
            let day = local_date.checked_sub_days(Days::new(u64::from(back)))?;
            let midnight = day.and_hms_opt(0, 0, 0)?;
            let start = Utc.from_utc_datetime(&midnight) - Duration::seconds(offset_secs);
            Some(DayWindow {
                start,
                end: start + Duration::days(1),
            })
        })
        .collect()
}

/// Returns true only if `day_satisfied` holds for every window.
///
/// A single unsatisfied day breaks the streak; evaluation stops at the
/// first gap. Multiple qualifying observations within one day count as
/// satisfying that day once; the predicate is asked once per window.
pub fn matches_consecutive<F>(windows: &[DayWindow], mut day_satisfied: F) -> Result<bool>
where
    F: FnMut(&DayWindow) -> Result<bool>,
{
    if windows.is_empty() {
        return Ok(false);
    }
    for window in windows {
        if !day_satisfied(window)? {
            return Ok(false);
        }
    }
    Ok(true)
}
