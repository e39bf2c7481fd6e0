pub mod catalog;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod service;

pub use error::{PayloadError, Result};
pub use service::PayloadService;
