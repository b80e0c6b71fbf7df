//! ESA load shield. Raises an Alibaba Cloud ESA WAF rule while the host is
//! under heavy load, and drops it again once load has stayed normal for the
//! cooldown window.
//!
//! Meant to be run from a periodic job (cron, systemd timer). Each run does
//! one evaluation; the only state kept between runs is the shield record.
//! Overlapping runs against the same record aren't guarded against, so the
//! scheduler must not start a run while the previous one is still going.

pub mod console;
mod controller;
mod outcome;
mod shield_record;
pub mod status;

pub use controller::{is_fresh, ShieldController};
pub use outcome::{NoOpReason, Outcome, ShieldAction, ShieldError};
pub use shield_record::{RecordState, RecordStoreError, ShieldRecord};
