pub mod app_config;
pub mod error;
pub mod time_util;
pub mod trading;

pub use error::app_error::AppError;
