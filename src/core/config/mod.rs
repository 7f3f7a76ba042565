pub mod data;
pub mod io;

pub use data::{Config, HttpSettings, ServerConfig};
pub use io::ConfigError;
