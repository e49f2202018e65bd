pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod record;
pub mod request;
pub mod response;
pub mod session;
pub mod system_log;
pub mod utils;
pub mod validate;
