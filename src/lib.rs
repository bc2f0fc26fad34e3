pub mod calibrate;
pub mod config;
pub mod error;
pub mod workload;
