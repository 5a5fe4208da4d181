//! Handles serialising and saving data to disk in the _parquet_ file format.

pub mod exceedances;
pub mod radar;

pub use exceedances::save_exceedances;
pub use radar::save_radar;
