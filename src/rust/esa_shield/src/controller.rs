//! The control loop. One call to [`ShieldController::evaluate`] samples the
//! load, looks at the shield record and makes at most one API call.

use crate::outcome::{NoOpReason, Outcome, ShieldAction, ShieldError};
use crate::shield_record::{RecordStoreError, ShieldRecord};
use chrono::NaiveDateTime;
use esa_client::{RemoteError, WafToggle};
use esa_config::Config;
use esa_utils::load_avg::{LoadError, LoadSource};
use esa_utils::local_time::{local_now, minutes_between};
use tracing::{error, info, warn};

/// A record is fresh while its age is within the window, inclusive.
pub fn is_fresh(age_minutes: f64, window_minutes: u64) -> bool {
    age_minutes <= window_minutes as f64
}

pub struct ShieldController<'a, L: LoadSource, W: WafToggle> {
    config: &'a Config,
    load: L,
    waf: W,
    record: ShieldRecord,
    dry_run: bool,
}

impl<'a, L: LoadSource, W: WafToggle> ShieldController<'a, L, W> {
    pub fn new(config: &'a Config, load: L, waf: W) -> Self {
        Self {
            config,
            load,
            waf,
            record: ShieldRecord::new(config.record_path()),
            dry_run: config.dry_run,
        }
    }

    /// Uses `record` instead of the configured record file.
    pub fn with_record(mut self, record: ShieldRecord) -> Self {
        self.record = record;
        self
    }

    /// Forces dry-run mode on; a dry run in the configuration can't be
    /// switched off from here.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run |= dry_run;
        self
    }

    pub fn record(&self) -> &ShieldRecord {
        &self.record
    }

    /// Runs one pass against the local wall clock.
    pub fn evaluate(&self) -> Outcome {
        self.evaluate_at(local_now())
    }

    /// Runs one pass as if the time were `now`. A record that can't be read
    /// counts as no record for the decision, and the pass is then reported
    /// as failed unless it already failed for another reason.
    pub fn evaluate_at(&self, now: NaiveDateTime) -> Outcome {
        let load = match self.load.sample_load() {
            Ok(load) => load,
            Err(e) => {
                match &e {
                    LoadError::UnsupportedPlatform(os) => {
                        warn!("Load monitoring is not supported on {os}, skipping this check")
                    }
                    LoadError::Sampling(_) => error!("{e}"),
                }
                return Outcome::Failed(ShieldError::Load(e));
            }
        };

        let (recorded, read_error) = match self.record.read() {
            Ok(recorded) => (recorded, None),
            Err(e) => {
                error!("{e}. Treating the shield as down for this pass.");
                (None, Some(e))
            }
        };
        let age = recorded.map(|at| minutes_between(&at, &now));

        let outcome = self.decide(load, age, &now);
        match read_error {
            Some(e) if outcome.is_success() => {
                warn!("Pass ended with \"{outcome}\", but the shield record could not be read");
                Outcome::Failed(e.into())
            }
            _ => outcome,
        }
    }

    fn decide(&self, load: f64, age: Option<f64>, now: &NaiveDateTime) -> Outcome {
        let threshold = self.config.load_threshold;
        let window = self.config.shield_record_window_minutes;

        if load > threshold {
            if let Some(age) = age.filter(|a| is_fresh(*a, window)) {
                info!(
                    "CPU load {load:.2} is above threshold {threshold}, but the shield was raised {age:.1} minutes ago. Skipping."
                );
                return Outcome::SkippedDuplicate { age_minutes: age };
            }
            info!("CPU load {load:.2} is above threshold {threshold}, raising the shield");
            self.enable(now)
        } else {
            info!("CPU load {load:.2} is within threshold {threshold}");
            match age {
                None => Outcome::NoOp(NoOpReason::NoRecord),
                Some(age) if is_fresh(age, window) => {
                    info!("Shield raised {age:.1} minutes ago, within the {window} minute window. Leaving it up.");
                    Outcome::NoOp(NoOpReason::CooldownActive { age_minutes: age })
                }
                Some(age) => {
                    info!("Shield raised {age:.1} minutes ago, past the {window} minute window. Dropping it.");
                    self.disable()
                }
            }
        }
    }

    fn enable(&self, now: &NaiveDateTime) -> Outcome {
        if self.dry_run {
            info!("Dry run: not calling the API or writing the record");
            return Outcome::DryRun(ShieldAction::Enable);
        }
        if let Err(e) = self.toggle(ShieldAction::Enable) {
            return Outcome::Failed(e);
        }
        // Without a record the next high-load pass calls the API again.
        match self.record.write(now) {
            Ok(()) => Outcome::Enabled,
            Err(e) => record_update_failed(ShieldAction::Enable, e),
        }
    }

    fn disable(&self) -> Outcome {
        if self.dry_run {
            info!("Dry run: not calling the API or clearing the record");
            return Outcome::DryRun(ShieldAction::Disable);
        }
        if let Err(e) = self.toggle(ShieldAction::Disable) {
            return Outcome::Failed(e);
        }
        match self.record.clear() {
            Ok(()) => Outcome::Disabled,
            Err(e) => record_update_failed(ShieldAction::Disable, e),
        }
    }

    fn toggle(&self, action: ShieldAction) -> Result<(), ShieldError> {
        let enabled = action == ShieldAction::Enable;
        match self
            .waf
            .set_rule_status(&self.config.site_id, &self.config.rule_id, enabled)
        {
            Ok(()) => {
                info!("API call to {action} the shield succeeded");
                Ok(())
            }
            Err(e) => {
                log_remote_failure(action, &e);
                Err(ShieldError::Remote { action, source: e })
            }
        }
    }
}

fn record_update_failed(action: ShieldAction, source: RecordStoreError) -> Outcome {
    error!("{source}");
    Outcome::Failed(ShieldError::RecordUpdate { action, source })
}

fn log_remote_failure(action: ShieldAction, e: &RemoteError) {
    error!("API call to {action} the shield failed: {e}");
    if let Some(recommend) = e.recommend() {
        error!("Recommendation: {recommend}");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use std::cell::RefCell;

    struct FixedLoad(Result<f64, LoadError>);

    impl LoadSource for FixedLoad {
        fn sample_load(&self) -> Result<f64, LoadError> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingWaf {
        calls: RefCell<Vec<bool>>,
        fail: bool,
    }

    impl WafToggle for RecordingWaf {
        fn set_rule_status(&self, site_id: &str, rule_id: &str, enabled: bool) -> Result<(), RemoteError> {
            assert_eq!(site_id, "1001");
            assert_eq!(rule_id, "2002");
            self.calls.borrow_mut().push(enabled);
            if self.fail {
                Err(RemoteError::from_response(
                    400,
                    r#"{"Code":"Throttling","Message":"slow down","Recommend":"https://example.com/r"}"#,
                ))
            } else {
                Ok(())
            }
        }
    }

    fn config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::load_from_string(
            r#"{
                "access_key_id": "AKID",
                "access_key_secret": "secret",
                "site_id": 1001,
                "rule_id": 2002,
                "load_threshold": 80.0
            }"#,
        )
        .unwrap();
        config.record_file = Some(dir.path().join("esa.txt"));
        config
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn minutes_ago(m: i64) -> NaiveDateTime {
        now() - Duration::minutes(m)
    }

    #[test]
    fn freshness_is_inclusive() {
        assert!(is_fresh(15.0, 15));
        assert!(!is_fresh(15.01, 15));
        assert!(is_fresh(-3.0, 15));
    }

    #[test]
    fn high_load_without_record_enables_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let waf = RecordingWaf::default();
        let controller = ShieldController::new(&config, FixedLoad(Ok(85.0)), &waf);
        let outcome = controller.evaluate_at(now());
        assert!(matches!(outcome, Outcome::Enabled));
        assert_eq!(*waf.calls.borrow(), vec![true]);
        assert_eq!(controller.record().read().unwrap(), Some(now()));
    }

    #[test]
    fn high_load_with_fresh_record_is_a_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let waf = RecordingWaf::default();
        let controller = ShieldController::new(&config, FixedLoad(Ok(85.0)), &waf);
        controller.record().write(&minutes_ago(15)).unwrap();
        let outcome = controller.evaluate_at(now());
        assert!(matches!(outcome, Outcome::SkippedDuplicate { age_minutes } if age_minutes == 15.0));
        assert!(waf.calls.borrow().is_empty());
    }

    #[test]
    fn high_load_with_stale_record_enables_again() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let waf = RecordingWaf::default();
        let controller = ShieldController::new(&config, FixedLoad(Ok(85.0)), &waf);
        controller.record().write(&minutes_ago(40)).unwrap();
        assert!(matches!(controller.evaluate_at(now()), Outcome::Enabled));
        assert_eq!(*waf.calls.borrow(), vec![true]);
        assert_eq!(controller.record().read().unwrap(), Some(now()));
    }

    #[test]
    fn load_equal_to_threshold_is_not_high() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let waf = RecordingWaf::default();
        let controller = ShieldController::new(&config, FixedLoad(Ok(80.0)), &waf);
        assert!(matches!(
            controller.evaluate_at(now()),
            Outcome::NoOp(NoOpReason::NoRecord)
        ));
        assert!(waf.calls.borrow().is_empty());
    }

    #[test]
    fn failed_disable_keeps_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let waf = RecordingWaf {
            fail: true,
            ..Default::default()
        };
        let controller = ShieldController::new(&config, FixedLoad(Ok(10.0)), &waf);
        controller.record().write(&minutes_ago(20)).unwrap();
        let outcome = controller.evaluate_at(now());
        assert_eq!(outcome.exit_code(), 1);
        let Outcome::Failed(ShieldError::Remote { action, source }) = outcome else {
            panic!("expected a remote failure");
        };
        assert_eq!(action, ShieldAction::Disable);
        assert_eq!(source.recommend(), Some("https://example.com/r"));
        assert_eq!(*waf.calls.borrow(), vec![false]);
        assert_eq!(controller.record().read().unwrap(), Some(minutes_ago(20)));
    }

    #[test]
    fn sampling_failure_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let waf = RecordingWaf::default();
        let controller = ShieldController::new(
            &config,
            FixedLoad(Err(LoadError::Sampling("getloadavg returned -1".to_string()))),
            &waf,
        );
        controller.record().write(&minutes_ago(30)).unwrap();
        let outcome = controller.evaluate_at(now());
        assert!(matches!(outcome, Outcome::Failed(ShieldError::Load(LoadError::Sampling(_)))));
        assert!(waf.calls.borrow().is_empty());
        assert_eq!(controller.record().read().unwrap(), Some(minutes_ago(30)));
    }

    #[test]
    fn corrupt_record_counts_as_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let waf = RecordingWaf::default();
        let controller = ShieldController::new(&config, FixedLoad(Ok(10.0)), &waf);
        std::fs::write(controller.record().path(), "15:00 yesterday").unwrap();
        assert!(matches!(
            controller.evaluate_at(now()),
            Outcome::NoOp(NoOpReason::NoRecord)
        ));
        assert!(!controller.record().path().exists());
        assert!(waf.calls.borrow().is_empty());
    }

    #[test]
    fn unreadable_record_fails_the_pass_at_normal_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let waf = RecordingWaf::default();
        let controller = ShieldController::new(&config, FixedLoad(Ok(50.0)), &waf);
        std::fs::create_dir(controller.record().path()).unwrap();
        let outcome = controller.evaluate_at(now());
        assert!(matches!(
            outcome,
            Outcome::Failed(ShieldError::Record(RecordStoreError::Read { .. }))
        ));
        assert_eq!(outcome.exit_code(), 1);
        assert!(waf.calls.borrow().is_empty());
        assert!(controller.record().path().is_dir());
    }

    #[test]
    fn unwritable_record_fails_the_pass_after_enable() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let waf = RecordingWaf::default();
        let controller = ShieldController::new(&config, FixedLoad(Ok(90.0)), &waf);
        std::fs::create_dir(controller.record().path()).unwrap();
        let outcome = controller.evaluate_at(now());
        assert_eq!(outcome.exit_code(), 1);
        let Outcome::Failed(ShieldError::RecordUpdate { action, source }) = outcome else {
            panic!("expected a record update failure");
        };
        assert_eq!(action, ShieldAction::Enable);
        assert!(matches!(source, RecordStoreError::Write { .. }));
        assert_eq!(*waf.calls.borrow(), vec![true]);
    }

    #[test]
    fn remote_failure_wins_over_unreadable_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let waf = RecordingWaf {
            fail: true,
            ..Default::default()
        };
        let controller = ShieldController::new(&config, FixedLoad(Ok(90.0)), &waf);
        std::fs::create_dir(controller.record().path()).unwrap();
        assert!(matches!(
            controller.evaluate_at(now()),
            Outcome::Failed(ShieldError::Remote { action: ShieldAction::Enable, .. })
        ));
    }

    #[test]
    fn dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let waf = RecordingWaf::default();

        let high = ShieldController::new(&config, FixedLoad(Ok(99.0)), &waf).with_dry_run(true);
        assert!(matches!(
            high.evaluate_at(now()),
            Outcome::DryRun(ShieldAction::Enable)
        ));
        assert_eq!(high.record().read().unwrap(), None);

        high.record().write(&minutes_ago(60)).unwrap();
        let low = ShieldController::new(&config, FixedLoad(Ok(1.0)), &waf).with_dry_run(true);
        assert!(matches!(
            low.evaluate_at(now()),
            Outcome::DryRun(ShieldAction::Disable)
        ));
        assert_eq!(low.record().read().unwrap(), Some(minutes_ago(60)));
        assert!(waf.calls.borrow().is_empty());
    }

    #[test]
    fn dry_run_from_config_sticks() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.dry_run = true;
        let waf = RecordingWaf::default();
        let controller =
            ShieldController::new(&config, FixedLoad(Ok(99.0)), &waf).with_dry_run(false);
        assert!(matches!(
            controller.evaluate_at(now()),
            Outcome::DryRun(ShieldAction::Enable)
        ));
    }
}
