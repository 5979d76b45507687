use std::{
    borrow::Cow,
    io,
    path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory containing configuration files relative to the application root.
const CONFIGURATION_DIR: &str = "configuration";

/// Environment variable for specifying an absolute path to the configuration directory.
const CONFIG_DIR_ENV_VAR: &str = "APP_CONFIG_DIR";

/// Supported extensions for base and environment configuration files.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Separator for list elements in environment variables.
const LIST_SEPARATOR: &str = ",";

/// Trait implemented by configuration structures that require list parsing help.
pub trait Config {
    /// Keys whose values should be parsed as lists when loading the configuration.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Identifies which configuration file is currently being loaded.
#[derive(Debug, Clone, Copy)]
enum ConfigFileKind {
    /// Always-present base configuration.
    Base,
    /// Environment-specific overrides (dev/prod).
    Environment(Environment),
}

impl ConfigFileKind {
    fn stem(&self) -> Cow<'static, str> {
        match self {
            ConfigFileKind::Base => Cow::Borrowed("base"),
            ConfigFileKind::Environment(env) => Cow::Borrowed(env.as_str()),
        }
    }

    /// Returns a static string describing this configuration file kind for error messages.
    fn as_str(&self) -> &'static str {
        match self {
            ConfigFileKind::Base => "base",
            ConfigFileKind::Environment(env) => env.as_str(),
        }
    }
}

/// Errors that can occur while loading configuration files and overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// Failed to determine the current working directory.
    #[error("failed to determine the current directory")]
    CurrentDir(#[source] io::Error),

    /// The configured `configuration` directory does not exist.
    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    /// Could not locate one of the required configuration files.
    #[error("could not locate {kind} configuration in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        kind: &'static str,
        directory: PathBuf,
        attempted: String,
    },

    /// The configuration files were parsed but deserialization failed.
    #[error("failed to deserialize configuration")]
    Deserialization(#[source] config::ConfigError),

    /// Failed to determine the runtime environment (`APP_ENVIRONMENT`).
    #[error("failed to determine runtime environment")]
    Environment(#[source] io::Error),

    /// Failed to initialize the configuration builder.
    #[error("failed to initialize configuration builder")]
    Builder(#[source] config::ConfigError),
}

/// Loads hierarchical configuration from base, environment, and environment-variable sources.
///
/// The configuration directory is determined by:
/// - First checking the `APP_CONFIG_DIR` environment variable for an absolute path
/// - If not set, using `<current_dir>/configuration`
///
/// Loads files from `base.(yaml|yml|json)` and `{environment}.(yaml|yml|json)`
/// before applying overrides from `APP_`-prefixed environment variables.
///
/// Nested keys use double underscores (`APP_PIPELINE__PUBLICATION_NAME`), and
/// list values are comma-separated.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let configuration_directory = if let Ok(config_dir) = std::env::var(CONFIG_DIR_ENV_VAR) {
        PathBuf::from(config_dir)
    } else {
        let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
        base_path.join(CONFIGURATION_DIR)
    };

    if !configuration_directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            configuration_directory,
        ));
    }

    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    let base_file = find_configuration_file(&configuration_directory, ConfigFileKind::Base)?;
    let environment_file = find_configuration_file(
        &configuration_directory,
        ConfigFileKind::Environment(environment),
    )?;

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !T::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let builder = config::Config::builder()
        .add_source(config::File::from(base_file))
        .add_source(config::File::from(environment_file))
        .add_source(environment_source);

    let settings = builder.build().map_err(LoadConfigError::Builder)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

/// Finds the configuration file that matches the requested kind and supported extensions.
fn find_configuration_file(
    directory: &Path,
    kind: ConfigFileKind,
) -> Result<PathBuf, LoadConfigError> {
    let stem = kind.stem();
    let mut attempted_paths = Vec::with_capacity(CONFIG_FILE_EXTENSIONS.len());

    for extension in CONFIG_FILE_EXTENSIONS {
        let path = directory.join(format!("{stem}.{extension}"));
        attempted_paths.push(path.clone());

        if path.is_file() {
            return Ok(path);
        }
    }

    let attempted = attempted_paths
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::ConfigurationFileMissing {
        kind: kind.as_str(),
        directory: directory.to_path_buf(),
        attempted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;
    use std::sync::{Mutex, OnceLock};
    use tempfile::TempDir;

    /// Mutex to serialize tests that modify environment variables or current directory.
    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct ApplicationConfig {
        name: String,
        port: u16,
    }

    impl Config for ApplicationConfig {
        const LIST_PARSE_KEYS: &'static [&'static str] = &[];
    }

    #[test]
    fn loads_base_and_environment_files() {
        let _guard = env_lock().lock().unwrap();

        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().join("configuration");
        fs::create_dir(&config_dir).unwrap();

        fs::write(config_dir.join("base.yaml"), "name: \"chrep\"\n").unwrap();
        fs::write(config_dir.join("prod.yaml"), "port: 5432\n").unwrap();

        unsafe {
            std::env::set_var("APP_CONFIG_DIR", config_dir.to_str().unwrap());
            std::env::set_var("APP_ENVIRONMENT", "prod");
        }

        let loaded: ApplicationConfig = load_config().unwrap();
        assert_eq!(
            loaded,
            ApplicationConfig {
                name: "chrep".to_string(),
                port: 5432,
            }
        );

        unsafe {
            std::env::remove_var("APP_CONFIG_DIR");
            std::env::remove_var("APP_ENVIRONMENT");
        }
    }

    #[test]
    fn missing_directory_is_an_error() {
        let _guard = env_lock().lock().unwrap();

        unsafe {
            std::env::set_var("APP_CONFIG_DIR", "/definitely/not/a/real/path");
        }

        let result = load_config::<ApplicationConfig>();
        assert!(matches!(
            result,
            Err(LoadConfigError::MissingConfigurationDirectory(_))
        ));

        unsafe {
            std::env::remove_var("APP_CONFIG_DIR");
        }
    }

    #[test]
    fn all_supported_extensions_detected() {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().join("configuration");
        fs::create_dir(&config_dir).unwrap();

        for extension in CONFIG_FILE_EXTENSIONS {
            let test_file = config_dir.join(format!("base.{extension}"));
            fs::write(&test_file, "{}").unwrap();

            let result = find_configuration_file(&config_dir, ConfigFileKind::Base);
            assert!(result.is_ok());
            assert_eq!(result.unwrap(), test_file);

            fs::remove_file(&test_file).unwrap();
        }
    }
}
