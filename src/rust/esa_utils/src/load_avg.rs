use thiserror::Error;
use tracing::{debug, warn};

/// Operating systems that expose `getloadavg(3)`, named as in
/// `std::env::consts::OS`.
pub const SUPPORTED_PLATFORMS: [&str; 6] =
    ["linux", "macos", "freebsd", "openbsd", "netbsd", "dragonfly"];

/// The kernel's run-queue averages over 1, 5 and 15 minutes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    /// 1-minute average
    pub one: f64,
    /// 5-minute average
    pub five: f64,
    /// 15-minute average
    pub fifteen: f64,
}

/// Anything that can report the current 1-minute load average.
pub trait LoadSource {
    /// Returns the 1-minute load average.
    fn sample_load(&self) -> Result<f64, LoadError>;
}

impl<T: LoadSource + ?Sized> LoadSource for &T {
    fn sample_load(&self) -> Result<f64, LoadError> {
        (**self).sample_load()
    }
}

/// Reads the load average of the machine we're running on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLoad;

impl LoadSource for SystemLoad {
    fn sample_load(&self) -> Result<f64, LoadError> {
        sample_load_average().map(|avg| avg.one)
    }
}

/// True if this host is on the load average allow-list.
pub fn platform_supported() -> bool {
    SUPPORTED_PLATFORMS.contains(&std::env::consts::OS)
}

/// Samples all three load averages from the kernel.
///
/// Fails with [`LoadError::UnsupportedPlatform`] on hosts that don't have
/// a load average, and [`LoadError::Sampling`] if the call itself fails.
pub fn sample_load_average() -> Result<LoadAverage, LoadError> {
    if !platform_supported() {
        warn!(
            "{} does not provide a load average",
            std::env::consts::OS
        );
        return Err(LoadError::UnsupportedPlatform(
            std::env::consts::OS.to_string(),
        ));
    }
    let avg = read_load_average()?;
    debug!("Load average: {:.2} {:.2} {:.2}", avg.one, avg.five, avg.fifteen);
    Ok(avg)
}

#[cfg(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
fn read_load_average() -> Result<LoadAverage, LoadError> {
    let mut samples = [0.0f64; 3];
    let filled = unsafe { nix::libc::getloadavg(samples.as_mut_ptr(), 3) };
    if filled < 3 {
        warn!("getloadavg returned {filled}");
        return Err(LoadError::Sampling(format!(
            "getloadavg returned {filled} of 3 samples"
        )));
    }
    if samples.iter().any(|s| !s.is_finite() || *s < 0.0) {
        return Err(LoadError::Sampling(format!(
            "kernel reported a nonsensical load average: {samples:?}"
        )));
    }
    Ok(LoadAverage {
        one: samples[0],
        five: samples[1],
        fifteen: samples[2],
    })
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
fn read_load_average() -> Result<LoadAverage, LoadError> {
    Err(LoadError::UnsupportedPlatform(
        std::env::consts::OS.to_string(),
    ))
}

/// Error type for load sampling.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The host OS has no load average facility.
    #[error("Load monitoring is not supported on {0}")]
    UnsupportedPlatform(String),
    /// The facility exists but didn't give us a value.
    #[error("Unable to sample the load average: {0}")]
    Sampling(String),
}
