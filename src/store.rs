//! TOML-backed sectioned configuration store.
//!
//! Both the main configuration file and the alignment settings file are plain
//! TOML documents with one table per section:
//!
//! ```toml
//! [CRYSTAL_HXP]
//! ALIGNMENT_POSITION_HXP_X = 0.125
//! ```
//!
//! Reads parse the file on every call so values persisted by an earlier step
//! of an alignment are always seen by the next one. Writes rewrite the whole
//! file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::error::{AppResult, DeviceError};
use crate::hardware::capabilities::Configuration;

/// Flattens a TOML document into `(section, key, value)` triples.
///
/// Only scalar values nested one level deep are returned; anything else is
/// not part of the sectioned layout.
pub fn flatten_sections(table: &toml::Table) -> Vec<(String, String, String)> {
    let mut out = Vec::new();
    for (section, body) in table {
        let Some(body) = body.as_table() else {
            continue;
        };
        for (key, value) in body {
            if let Some(text) = scalar_to_string(value) {
                out.push((section.clone(), key.clone(), text));
            }
        }
    }
    out
}

fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

fn text_to_value(text: &str) -> toml::Value {
    if let Ok(i) = text.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = text.parse::<f64>() {
        toml::Value::Float(f)
    } else if let Ok(b) = text.parse::<bool>() {
        toml::Value::Boolean(b)
    } else {
        toml::Value::String(text.to_string())
    }
}

/// Configuration store reading and writing TOML files under one directory.
#[derive(Clone, Debug)]
pub struct TomlConfiguration {
    base_path: PathBuf,
    config_filename: PathBuf,
    alignment_filename: PathBuf,
    log_dir: PathBuf,
}

impl TomlConfiguration {
    /// Store for `config_filename` and `alignment_filename` inside `base_path`.
    pub fn new(
        base_path: impl Into<PathBuf>,
        config_filename: impl Into<PathBuf>,
        alignment_filename: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            config_filename: config_filename.into(),
            alignment_filename: alignment_filename.into(),
            log_dir: log_dir.into(),
        }
    }

    fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.base_path.join(file)
        }
    }

    fn load(&self, file: &Path) -> AppResult<toml::Table> {
        let text = fs::read_to_string(self.resolve(file))?;
        Ok(text.parse::<toml::Table>()?)
    }

    fn store(&self, value: &str, section: &str, key: &str, file: &Path) -> AppResult<()> {
        let path = self.resolve(file);
        let mut table = match fs::read_to_string(&path) {
            Ok(text) => text.parse::<toml::Table>()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => return Err(e.into()),
        };

        let entry = table
            .entry(section.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let Some(body) = entry.as_table_mut() else {
            return Err(DeviceError::Configuration(format!(
                "{section} in {} is not a section",
                path.display()
            )));
        };
        body.insert(key.to_string(), text_to_value(value));

        fs::write(&path, toml::to_string(&table)?)?;
        Ok(())
    }
}

impl Configuration for TomlConfiguration {
    fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn config_filename(&self) -> &Path {
        &self.config_filename
    }

    fn alignment_settings_filename(&self) -> &Path {
        &self.alignment_filename
    }

    fn log_files_directory(&self) -> PathBuf {
        self.log_dir.clone()
    }

    fn read_raw(&self, file: &Path, section: &str, key: &str) -> AppResult<String> {
        let table = self.load(file)?;
        table
            .get(section)
            .and_then(|body| body.get(key))
            .and_then(scalar_to_string)
            .ok_or_else(|| {
                DeviceError::Configuration(format!(
                    "missing {section}/{key} in {}",
                    file.display()
                ))
            })
    }

    fn write(&mut self, value: &str, section: &str, key: &str, file: &Path) -> i32 {
        match self.store(value, section, key, file) {
            Ok(()) => {
                debug!(section, key, value, file = %file.display(), "persisted value");
                1
            }
            Err(err) => {
                error!(section, key, file = %file.display(), error = %err, "failed to persist value");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::ConfigFile;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> TomlConfiguration {
        TomlConfiguration::new(dir, "config.toml", "alignment.toml", dir.join("LogFiles"))
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = tempdir().unwrap();
        let mut store = store_in(dir.path());
        let file = store.filename(ConfigFile::Main);

        assert_eq!(store.write("1.25", "CRYSTAL_HXP", "ALIGNMENT_POSITION_HXP_Y", &file), 1);
        assert_eq!(store.write("-3", "CRYSTAL_HXP", "ALIGNMENT_POSITION_HXP_X", &file), 1);

        assert_eq!(
            store
                .read_float(ConfigFile::Main, "CRYSTAL_HXP", "ALIGNMENT_POSITION_HXP_Y")
                .unwrap(),
            1.25
        );
        assert_eq!(
            store
                .read_float(ConfigFile::Main, "CRYSTAL_HXP", "ALIGNMENT_POSITION_HXP_X")
                .unwrap(),
            -3.0
        );
    }

    #[test]
    fn test_keys_keep_their_case_and_digits() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "[X-RAY_SENSOR]\n2THETA = 41.5\n",
        )
        .unwrap();
        let store = store_in(dir.path());
        assert_eq!(
            store.read_float(ConfigFile::Main, "X-RAY_SENSOR", "2THETA").unwrap(),
            41.5
        );
    }

    #[test]
    fn test_write_preserves_other_sections() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "[A]\nNAME = \"scan.csv\"\n[B]\nVALUE = 2\n",
        )
        .unwrap();
        let mut store = store_in(dir.path());
        let file = store.filename(ConfigFile::Main);
        assert_eq!(store.write("7.5", "B", "VALUE", &file), 1);

        assert_eq!(store.read_string(ConfigFile::Main, "A", "NAME").unwrap(), "scan.csv");
        assert_eq!(store.read_float(ConfigFile::Main, "B", "VALUE").unwrap(), 7.5);
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("alignment.toml"), "[A]\n").unwrap();
        let store = store_in(dir.path());
        assert!(matches!(
            store.read_float(ConfigFile::AlignmentSettings, "A", "STEP_SIZE"),
            Err(DeviceError::Configuration(_))
        ));
    }

    #[test]
    fn test_write_into_unwritable_location_reports_zero() {
        let dir = tempdir().unwrap();
        let mut store = TomlConfiguration::new(
            dir.path().join("does-not-exist"),
            "config.toml",
            "alignment.toml",
            dir.path(),
        );
        let file = store.filename(ConfigFile::Main);
        assert_eq!(store.write("1", "A", "B", &file), 0);
    }
}
