use crate::shield_record::RecordStoreError;
use esa_client::RemoteError;
use esa_utils::load_avg::LoadError;
use std::fmt::Display;
use thiserror::Error;

/// Which way the controller moved (or would have moved) the shield.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShieldAction {
    Enable,
    Disable,
}

impl Display for ShieldAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShieldAction::Enable => write!(f, "enable"),
            ShieldAction::Disable => write!(f, "disable"),
        }
    }
}

/// Why nothing needed doing.
#[derive(Debug, Clone, PartialEq)]
pub enum NoOpReason {
    /// Load is normal and the shield is down.
    NoRecord,
    /// Load is normal but the shield went up too recently to drop it.
    CooldownActive { age_minutes: f64 },
}

/// Result of one pass of the controller.
#[derive(Debug)]
pub enum Outcome {
    /// The rule was switched on and the record written.
    Enabled,
    /// The rule was switched off and the record cleared.
    Disabled,
    NoOp(NoOpReason),
    /// Load is high but the shield is already up.
    SkippedDuplicate { age_minutes: f64 },
    /// Dry run: the action that would have been taken.
    DryRun(ShieldAction),
    Failed(ShieldError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Failed(_))
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Enabled => write!(f, "shield enabled"),
            Outcome::Disabled => write!(f, "shield disabled"),
            Outcome::NoOp(NoOpReason::NoRecord) => write!(f, "no action needed"),
            Outcome::NoOp(NoOpReason::CooldownActive { age_minutes }) => {
                write!(f, "no action needed, shield raised {age_minutes:.1} minutes ago")
            }
            Outcome::SkippedDuplicate { age_minutes } => {
                write!(f, "shield already raised {age_minutes:.1} minutes ago")
            }
            Outcome::DryRun(action) => write!(f, "dry run, would {action} the shield"),
            Outcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Failures that end a pass with a non-zero exit.
#[derive(Error, Debug)]
pub enum ShieldError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("Unable to {action} the shield: {source}")]
    Remote {
        action: ShieldAction,
        source: RemoteError,
    },
    /// The record couldn't be read. The pass went ahead as if there were none.
    #[error(transparent)]
    Record(#[from] RecordStoreError),
    /// The API call went through but the record wasn't updated to match.
    #[error("The API call to {action} the shield succeeded, but the record is out of date: {source}")]
    RecordUpdate {
        action: ShieldAction,
        source: RecordStoreError,
    },
}
