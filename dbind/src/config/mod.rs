//! Pool configuration loaded from files and environment variables

pub mod defaults;
mod settings;

pub use settings::{Backend, PoolConfig};
