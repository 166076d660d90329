use std::fs;
use std::path::{Path, PathBuf};

use crate::io::store::atomic_write;
use crate::model::config::{Config, DEFAULT_DATA_FILE_NAME};

/// Environment variable that relocates the config directory.
pub const HOME_ENV: &str = "TASKER_HOME";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Error type for config I/O
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not write {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config.toml: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("could not parse config.toml: {0}")]
    DocumentError(#[from] toml_edit::TomlError),
    #[error("unknown config key '{0}'")]
    UnknownKey(String),
    #[error("invalid value '{value}' for {key}: expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
    #[error("config already exists at {0} (use --force to overwrite)")]
    AlreadyExists(PathBuf),
}

/// Resolve the config directory: explicit override, then `$TASKER_HOME`,
/// then `~/.tasker`.
pub fn config_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    if let Ok(dir) = std::env::var(HOME_ENV)
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs_home().join(".tasker")
}

/// Get the user's home directory
fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

/// A missing config file means the app has never been set up.
pub fn is_first_run(dir: &Path) -> bool {
    !config_path(dir).exists()
}

/// Read the config, returning both the typed config and the raw
/// toml_edit document for round-trip-safe editing. `None` on first run.
pub fn read_config(dir: &Path) -> Result<Option<(Config, toml_edit::DocumentMut)>, ConfigError> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
        path: path.clone(),
        source: e,
    })?;
    let config: Config = toml::from_str(&text)?;
    let doc: toml_edit::DocumentMut = text.parse()?;
    Ok(Some((config, doc)))
}

/// Write the config document back to disk, preserving formatting.
pub fn write_config(dir: &Path, doc: &toml_edit::DocumentMut) -> Result<(), ConfigError> {
    let path = config_path(dir);
    fs::create_dir_all(dir).map_err(|e| ConfigError::WriteError {
        path: path.clone(),
        source: e,
    })?;
    atomic_write(&path, doc.to_string().as_bytes()).map_err(|e| ConfigError::WriteError {
        path,
        source: e,
    })
}

/// The document written on first run.
pub fn default_config_doc(data_file: &Path) -> toml_edit::DocumentMut {
    let mut doc = toml_edit::DocumentMut::new();
    doc["data_file"] = toml_edit::value(data_file.to_string_lossy().as_ref());
    doc["ms_sync_enabled"] = toml_edit::value(false);
    doc["ms_tasklist_name"] = toml_edit::value("Tasker");
    doc["ms_client_id"] = toml_edit::value("");
    doc
}

/// Write a fresh config. Refuses to clobber an existing one unless `force`.
pub fn init_config(
    dir: &Path,
    data_file: Option<PathBuf>,
    force: bool,
) -> Result<Config, ConfigError> {
    let path = config_path(dir);
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists(path));
    }
    let data_file = data_file.unwrap_or_else(|| dir.join(DEFAULT_DATA_FILE_NAME));
    let doc = default_config_doc(&data_file);
    write_config(dir, &doc)?;
    log::info!("wrote {} (data file {})", path.display(), data_file.display());
    Ok(toml::from_str(&doc.to_string())?)
}

/// Load the config, writing the default one on first run.
/// The flag is true when this call created the config.
pub fn load_or_init(dir: &Path) -> Result<(Config, bool), ConfigError> {
    match read_config(dir)? {
        Some((config, _)) => Ok((config, false)),
        None => Ok((init_config(dir, None, false)?, true)),
    }
}

/// Set a known key from its string form, validating the type.
pub fn set_value(doc: &mut toml_edit::DocumentMut, key: &str, raw: &str) -> Result<(), ConfigError> {
    let invalid = |expected| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        expected,
    };
    match key {
        "ms_sync_enabled" => {
            let v = match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => return Err(invalid("true or false")),
            };
            doc[key] = toml_edit::value(v);
        }
        "reminder_interval_secs" | "watch_interval_secs" => {
            let v: i64 = raw.trim().parse().map_err(|_| invalid("a positive number"))?;
            if v <= 0 {
                return Err(invalid("a positive number"));
            }
            doc[key] = toml_edit::value(v);
        }
        "data_file" | "ms_tasklist_name" | "ms_client_id" | "ms_account_id" => {
            doc[key] = toml_edit::value(raw);
        }
        other => return Err(ConfigError::UnknownKey(other.to_string())),
    }
    Ok(())
}

/// Record the account a sync sign-in resolved to.
pub fn set_account_id(doc: &mut toml_edit::DocumentMut, account_id: &str) {
    doc["ms_account_id"] = toml_edit::value(account_id);
}

/// Persist `account_id` into config.toml, keeping everything else as written.
pub fn save_account_id(dir: &Path, account_id: &str) -> Result<(), ConfigError> {
    let mut doc = match read_config(dir)? {
        Some((_, doc)) => doc,
        None => default_config_doc(&dir.join(DEFAULT_DATA_FILE_NAME)),
    };
    set_account_id(&mut doc, account_id);
    write_config(dir, &doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> &'static str {
        r#"# my tasks
data_file = "/data/tasks.json"
ms_sync_enabled = true
ms_tasklist_name = "Work"
ms_client_id = "abc-123"

theme = "dark"
"#
    }

    #[test]
    fn test_config_dir_override_wins() {
        let dir = config_dir(Some(Path::new("/tmp/x")));
        assert_eq!(dir, PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_round_trip_config() {
        let tmp = TempDir::new().unwrap();
        fs::write(config_path(tmp.path()), sample_config()).unwrap();

        let (config, doc) = read_config(tmp.path()).unwrap().unwrap();
        assert_eq!(config.ms_tasklist_name, "Work");
        assert!(config.ms_sync_enabled);
        write_config(tmp.path(), &doc).unwrap();

        let written = fs::read_to_string(config_path(tmp.path())).unwrap();
        assert_eq!(written, sample_config());
    }

    #[test]
    fn test_first_run_detection_and_init() {
        let tmp = TempDir::new().unwrap();
        assert!(is_first_run(tmp.path()));
        assert!(read_config(tmp.path()).unwrap().is_none());

        let (config, created) = load_or_init(tmp.path()).unwrap();
        assert!(created);
        assert!(!is_first_run(tmp.path()));
        assert_eq!(config.data_file_path(tmp.path()), tmp.path().join("tasks.json"));

        let (_, created_again) = load_or_init(tmp.path()).unwrap();
        assert!(!created_again);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let tmp = TempDir::new().unwrap();
        init_config(tmp.path(), None, false).unwrap();
        assert!(matches!(
            init_config(tmp.path(), None, false),
            Err(ConfigError::AlreadyExists(_))
        ));
        let custom = tmp.path().join("elsewhere.json");
        let config = init_config(tmp.path(), Some(custom.clone()), true).unwrap();
        assert_eq!(config.data_file_path(tmp.path()), custom);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(config_path(tmp.path()), "data_file = [").unwrap();
        assert!(read_config(tmp.path()).is_err());
    }

    #[test]
    fn test_set_value_validates_and_preserves_other_keys() {
        let mut doc: toml_edit::DocumentMut = sample_config().parse().unwrap();
        set_value(&mut doc, "ms_sync_enabled", "off").unwrap();
        set_value(&mut doc, "reminder_interval_secs", "10").unwrap();
        assert!(set_value(&mut doc, "reminder_interval_secs", "-3").is_err());
        assert!(set_value(&mut doc, "ms_sync_enabled", "maybe").is_err());
        assert!(matches!(
            set_value(&mut doc, "colour", "red"),
            Err(ConfigError::UnknownKey(_))
        ));

        let config: Config = toml::from_str(&doc.to_string()).unwrap();
        assert!(!config.ms_sync_enabled);
        assert_eq!(config.reminder_interval_secs, 10);
        assert_eq!(config.extra["theme"].as_str(), Some("dark"));
        assert!(doc.to_string().starts_with("# my tasks\n"));
    }

    #[test]
    fn test_set_account_id() {
        let mut doc: toml_edit::DocumentMut = sample_config().parse().unwrap();
        set_account_id(&mut doc, "acct-1");
        let config: Config = toml::from_str(&doc.to_string()).unwrap();
        assert_eq!(config.ms_account_id.as_deref(), Some("acct-1"));
    }
}
