//! Configuration loader with file resolution and environment overrides.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "REMOTE_SERIAL";

const CONFIG_FILE_NAME: &str = "remote-serial.toml";

/// Environment variable for an explicit config path
const CONFIG_PATH_ENV: &str = "REMOTE_SERIAL_CONFIG";

/// Loaded configuration plus the file it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub config_path: Option<PathBuf>,
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using the standard resolution order, apply
    /// environment overrides and validate the result.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Defaults plus environment overrides, no file.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Bad overrides are ignored here; `load` reports them.
        let _ = apply_env_overrides(&mut config);

        Self {
            config_path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Write the current configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Re-read the file this configuration came from, if any.
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            config.validate()?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using the standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    get_default_config_path().filter(|path| path.exists())
}

/// Platform config directory for this application.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "remote-serial").map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::io("read", path, e))?;
    Ok(toml::from_str(&content)?)
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::io("create directory for", path, e))?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::io("write", path, e))
}

fn env_var(key: &str) -> Option<(String, String)> {
    let name = format!("{ENV_PREFIX}_{key}");
    std::env::var(&name).ok().map(|value| (name, value))
}

fn parse_env<T: FromStr>(name: &str, value: &str, what: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env(name, format!("Invalid {what}: '{value}'")))
}

fn parse_bool(name: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env(name, format!("Invalid boolean: '{value}'"))),
    }
}

/// Apply `REMOTE_SERIAL_<SECTION>_<KEY>` overrides.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Some((_, val)) = env_var("SERVER_URL") {
        config.server.url = val;
    }

    if let Some((_, val)) = env_var("SERIAL_REMOTE_PATH") {
        config.serial.remote_path = val;
    }
    if let Some((name, val)) = env_var("SERIAL_BAUD_RATE") {
        config.serial.baud_rate = parse_env(&name, &val, "baud rate")?;
    }
    if let Some((_, val)) = env_var("SERIAL_PATH_PATTERN") {
        config.serial.path_pattern = val;
    }
    if let Some((_, val)) = env_var("SERIAL_VIRTUAL_PORTS") {
        config.serial.virtual_ports = val
            .split(',')
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(String::from)
            .collect();
    }

    if let Some((name, val)) = env_var("SESSION_HANDSHAKE_TIMEOUT_MS") {
        config.session.handshake_timeout_ms = parse_env(&name, &val, "timeout")?;
    }
    if let Some((name, val)) = env_var("SESSION_DEBUG") {
        config.session.debug = parse_bool(&name, &val)?;
    }

    if let Some((_, val)) = env_var("LOGGING_LEVEL") {
        config.logging.level = val;
    }
    if let Some((name, val)) = env_var("LOGGING_FORMAT") {
        config.logging.format = match val.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => return Err(ConfigError::env(name, format!("Unknown log format: '{val}'"))),
        };
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.remote_path, "/dev/ttyUSB0");
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("REMOTE_SERIAL_SERVER_URL", "ws://10.0.0.2:9000");
        env::set_var("REMOTE_SERIAL_SERIAL_BAUD_RATE", "57600");
        env::set_var("REMOTE_SERIAL_SERIAL_VIRTUAL_PORTS", "/dev/ttyUSB3, COM4");
        env::set_var("REMOTE_SERIAL_SESSION_DEBUG", "yes");

        let loader = ConfigLoader::with_defaults();
        let config = loader.config();
        assert_eq!(config.server.url, "ws://10.0.0.2:9000");
        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.serial.virtual_ports, vec!["/dev/ttyUSB3", "COM4"]);
        assert!(config.session.debug);

        env::remove_var("REMOTE_SERIAL_SERVER_URL");
        env::remove_var("REMOTE_SERIAL_SERIAL_BAUD_RATE");
        env::remove_var("REMOTE_SERIAL_SERIAL_VIRTUAL_PORTS");
        env::remove_var("REMOTE_SERIAL_SESSION_DEBUG");
    }

    #[test]
    #[serial]
    fn test_bad_env_value_is_reported() {
        env::set_var("REMOTE_SERIAL_SESSION_HANDSHAKE_TIMEOUT_MS", "soon");
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config).unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. }
            if var == "REMOTE_SERIAL_SESSION_HANDSHAKE_TIMEOUT_MS"));
        env::remove_var("REMOTE_SERIAL_SESSION_HANDSHAKE_TIMEOUT_MS");
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [server]
            url = "wss://serial.example.com"

            [session]
            handshake_timeout_ms = 250
            "#
        )
        .unwrap();

        let loader = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(loader.config().server.url, "wss://serial.example.com");
        assert_eq!(loader.config().session.handshake_timeout_ms, 250);
        assert_eq!(loader.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    #[serial]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            ConfigLoader::load_from(&missing),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    #[serial]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nhandshake_timeout_ms = 0").unwrap();
        assert!(matches!(
            ConfigLoader::load_from(file.path()),
            Err(ConfigError::Zero("session.handshake_timeout_ms"))
        ));
    }

    #[test]
    #[serial]
    fn test_explicit_config_env_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[serial]\nremote_path = \"/dev/ttyACM0\"\n").unwrap();
        env::set_var(CONFIG_PATH_ENV, &path);

        assert_eq!(resolve_config_path(), Some(path.clone()));
        let loader = ConfigLoader::load().unwrap();
        assert_eq!(loader.config().serial.remote_path, "/dev/ttyACM0");

        env::remove_var(CONFIG_PATH_ENV);
    }

    #[test]
    #[serial]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut loader = ConfigLoader::with_defaults();
        loader.config_mut().serial.remote_path = "COM7".to_string();
        loader.save_to(&path).unwrap();

        let mut reloaded = ConfigLoader::load_from(&path).unwrap();
        assert_eq!(reloaded.config().serial.remote_path, "COM7");

        std::fs::write(&path, "[serial]\nremote_path = \"COM8\"\n").unwrap();
        reloaded.reload().unwrap();
        assert_eq!(reloaded.config().serial.remote_path, "COM8");
    }
}
