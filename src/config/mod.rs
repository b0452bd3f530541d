//! Configuration management for reportq.
//!
//! This module handles loading configuration from `~/.reportq/`.

mod paths;
mod settings;

pub use paths::{Paths, HOME_ENV};
pub use settings::{
    ColorSetting, Config, GeneralConfig, LogConfig, LogFormat, QueueConfig, SyncConfig,
};
