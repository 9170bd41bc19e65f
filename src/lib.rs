pub mod app;
pub mod cli;
pub mod config;
pub mod dates;
pub mod error;
pub mod inventory;
pub mod remote;
pub mod search;
pub mod storage;
pub mod sync;

pub use app::InventoryApp;
pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use error::{GatewayError, LoadError, QueueError};
