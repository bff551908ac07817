pub mod commands;
pub mod config;
pub mod logging;
pub mod model;
pub mod server;

pub use config::{ConfigError, WmConfig};
pub use model::{WmModel, WmNode};
pub use server::{Server, ServerConfig};
