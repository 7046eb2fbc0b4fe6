pub mod api;
pub mod config;
pub mod error;
pub mod files;
pub mod models;
pub mod service;

pub use config::AppConfig;
pub use error::RateioError;
pub use service::{Pipeline, RunRequest};
