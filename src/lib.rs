#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod http;
pub mod models;
pub mod runner;
pub mod transform;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
