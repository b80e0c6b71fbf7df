//! Collection of utility functions for the ESA load shield

#![warn(missing_docs)]

/// Host load average sampling.
pub mod load_avg;

/// Local wall-clock timestamps in the shield record format.
pub mod local_time;
