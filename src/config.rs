use serde::Deserialize;
use std::path::PathBuf;
use uuid::Uuid;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: PathBuf,
    /// Vault the CLI operates on
    pub vault_id: Uuid,
    /// Directory holding git working clones, one per sync config
    pub git_work_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let base = PathBuf::from(&home).join(".amity");
        Self {
            database_path: base.join("amity.db"),
            vault_id: Uuid::nil(),
            git_work_dir: base.join("git-work"),
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Self::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("AMITY_DATABASE_PATH") {
            config.database_path = PathBuf::from(db_path);
        }
        if let Ok(vault_id) = std::env::var("AMITY_VAULT_ID") {
            config.vault_id = Uuid::parse_str(&vault_id)
                .map_err(|e| ConfigError::InvalidVaultId(vault_id, e))?;
        }
        if let Ok(work_dir) = std::env::var("AMITY_GIT_WORK_DIR") {
            config.git_work_dir = PathBuf::from(work_dir);
        }

        Ok(config)
    }

    /// Default config file path: ~/.config/amity/config.yaml
    pub fn default_config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".config")
            .join("amity")
            .join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidVaultId(String, uuid::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    e
                )
            }
            ConfigError::InvalidVaultId(value, e) => {
                write!(f, "Invalid AMITY_VAULT_ID '{}': {}", value, e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database_path.to_string_lossy().contains("amity.db"));
        assert!(config.vault_id.is_nil());
    }

    #[test]
    fn test_load_no_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config.vault_id.is_nil());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: /custom/path/db.sqlite").unwrap();
        writeln!(file, "vault_id: 6a2f1bc4-52a2-4c5e-8d1c-3f4d5e6a7b8c").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.database_path,
            PathBuf::from("/custom/path/db.sqlite")
        );
        assert_eq!(
            config.vault_id.to_string(),
            "6a2f1bc4-52a2-4c5e-8d1c-3f4d5e6a7b8c"
        );
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
