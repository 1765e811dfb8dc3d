//! Tracks time spent on a handful of websites and emails a usage report for every local day,
//! making sure each day is reported once even when the process is killed or several triggers
//! race each other.
//!

pub mod cli;
pub mod daemon;
pub mod email;
pub mod fs;
pub mod report;
pub mod tracking;
pub mod utils;
