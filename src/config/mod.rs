//! TOML configuration with environment variable overrides.
//!
//! # Resolution
//!
//! The first of these that exists wins:
//!
//! 1. `REMOTE_SERIAL_CONFIG` environment variable (explicit path)
//! 2. `./remote-serial.toml`
//! 3. `remote-serial.toml` in the platform config directory
//!    (`~/.config/remote-serial/` on Linux)
//! 4. Built-in defaults
//!
//! # Environment overrides
//!
//! Applied on top of whatever was loaded, as `REMOTE_SERIAL_<SECTION>_<KEY>`:
//!
//! - `REMOTE_SERIAL_SERVER_URL=ws://10.0.0.2:17991`
//! - `REMOTE_SERIAL_SERIAL_REMOTE_PATH=/dev/ttyACM0`
//! - `REMOTE_SERIAL_SESSION_HANDSHAKE_TIMEOUT_MS=2000`
//!
//! # Example
//!
//! ```rust,ignore
//! use remote_serialport_client::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! println!("server: {}", loader.config().server.url);
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{Config, LogFormat, LoggingConfig, SerialConfig, ServerConfig, SessionConfig};
