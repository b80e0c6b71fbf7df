use chrono::{Local, NaiveDateTime, SubsecRound};
use thiserror::Error;

/// `strftime` format of the shield record, e.g. `2025-01-31 23:59:01`.
pub const RECORD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The local wall-clock time, truncated to whole seconds.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

/// Formats a timestamp the way the shield record stores it.
pub fn format_timestamp(t: &NaiveDateTime) -> String {
    t.format(RECORD_TIME_FORMAT).to_string()
}

/// Parses a shield record timestamp. Surrounding whitespace is ignored.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, TimeError> {
    NaiveDateTime::parse_from_str(raw.trim(), RECORD_TIME_FORMAT)
        .map_err(|_| TimeError::BadFormat(raw.trim().to_string()))
}

/// Minutes elapsed from `earlier` to `later`, with fractions. Negative
/// if `earlier` is in the future.
pub fn minutes_between(earlier: &NaiveDateTime, later: &NaiveDateTime) -> f64 {
    (*later - *earlier).num_seconds() as f64 / 60.0
}

/// Error type for time functions.
#[derive(Error, Debug, PartialEq)]
pub enum TimeError {
    /// The text isn't a `YYYY-MM-DD HH:MM:SS` timestamp.
    #[error("Not a valid timestamp: {0:?}")]
    BadFormat(String),
}
