//! Checks analysis results and API data against alarm thresholds and the alarm log.

pub mod alarms;
pub mod gauges;
pub mod matcher;
pub mod radar;
pub mod threshold;
