//! Parameter sweep runner.
//!
//! Executes every combination of a cartesian parameter space exactly once on a pool of hosts,
//! reusing a transferred dataset for consecutive combinations that share it, and records the
//! results in two append only summary tables.

pub mod combination;
pub mod config;
pub mod driver;
pub mod executors;
pub mod manager;
pub mod space;
pub mod stats;
pub mod sweep;
pub mod worker;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod executors_test;
#[cfg(test)]
mod worker_test;
