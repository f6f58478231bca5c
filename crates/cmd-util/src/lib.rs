//! Process bootstrap helpers: env-var config knobs and `tracing` setup.
//!
//! Every binary in this workspace calls [`env::config_service`] (or
//! `config_tool` for one-shot scripts) exactly once at startup, and every
//! test module calls [`env::config_test`]. Library crates never touch
//! `tracing_subscriber` directly.

pub mod env;
pub mod keyvalue;
