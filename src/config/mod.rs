//! # Configuration
//!
//! A `key = value` config file parsed into raw pairs, then bound onto
//! typed settings with defaults and range checks.

pub mod parser;
pub mod settings;

pub use settings::Settings;
