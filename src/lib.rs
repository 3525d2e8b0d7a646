pub mod attack;
pub mod backend;
pub mod config;
pub mod harness;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod rate;
pub mod target;
