//! Retrieval of rain gauge and radar data from the Moata API.

pub mod gauges;
pub mod radar;
