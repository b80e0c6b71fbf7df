//! Read-only report for `esa_shield status`.

use crate::console::{self, Mark};
use crate::controller::is_fresh;
use crate::shield_record::{RecordState, ShieldRecord};
use chrono::NaiveDateTime;
use esa_config::Config;
use esa_utils::load_avg::{sample_load_average, LoadAverage, LoadError};
use esa_utils::local_time::{format_timestamp, minutes_between};

/// Describes the record relative to `now`.
pub fn describe_record(state: &RecordState, now: &NaiveDateTime, window: u64) -> (Mark, String) {
    match state {
        RecordState::Absent => (Mark::Ok, "No shield record, shield is considered down".to_string()),
        RecordState::Valid(at) => {
            let age = minutes_between(at, now);
            let freshness = if is_fresh(age, window) {
                "within"
            } else {
                "past"
            };
            (
                Mark::Ok,
                format!(
                    "Shield raised at {} ({age:.1} minutes ago, {freshness} the {window} minute window)",
                    format_timestamp(at)
                ),
            )
        }
        RecordState::Malformed(content) => (
            Mark::Warn,
            format!("Shield record holds {content:?}; the next check will remove it"),
        ),
        RecordState::Unreadable(reason) => (
            Mark::Error,
            format!("Shield record is unreadable, checks will fail until it is fixed: {reason}"),
        ),
    }
}

/// Describes a load sample against the threshold.
pub fn describe_load(sample: &Result<LoadAverage, LoadError>, threshold: f64) -> (Mark, String) {
    match sample {
        Ok(avg) => {
            let (mark, verdict) = if avg.one > threshold {
                (Mark::Warn, "above")
            } else {
                (Mark::Ok, "within")
            };
            (
                mark,
                format!(
                    "Load average {:.2} {:.2} {:.2} ({verdict} threshold {threshold})",
                    avg.one, avg.five, avg.fifteen
                ),
            )
        }
        Err(e) => (Mark::Error, e.to_string()),
    }
}

/// Prints host, load and record details.
pub fn print_status(config: &Config, record: &ShieldRecord, now: &NaiveDateTime) {
    let host = sysinfo::System::host_name().unwrap_or_else(|| "unknown host".to_string());
    let kernel = sysinfo::System::kernel_version().unwrap_or_else(|| "unknown kernel".to_string());
    console::report(Mark::Ok, &format!("{host} ({} {kernel})", std::env::consts::OS));

    let (mark, line) = describe_load(&sample_load_average(), config.load_threshold);
    console::report(mark, &line);

    console::report(Mark::Ok, &format!(
        "Rule {} on site {} via {}{}",
        config.rule_id,
        config.site_id,
        config.endpoint,
        if config.dry_run { " (dry run)" } else { "" }
    ));

    let (mark, line) = describe_record(&record.inspect(), now, config.shield_record_window_minutes);
    console::report(mark, &format!("{line} [{}]", record.path().display()));
}
