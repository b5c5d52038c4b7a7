use chrono::{DateTime, TimeZone};
use std::fmt::Display;

fn fmt_ts<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// File name for a motion snapshot, e.g. "20260218_093000.jpg".
///
/// Second resolution: two snapshots within the same second share a name.
pub fn snapshot_file_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!("{}.jpg", fmt_ts(at))
}

/// File name for a recorded clip, e.g. "20260218_093015.avi".
pub fn clip_file_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!("{}.avi", fmt_ts(at))
}
