//! Static HTML reports over the pipeline outputs.

pub mod gauges;
pub mod html;
pub mod radar;
pub mod validation;
