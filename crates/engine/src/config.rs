//! Engine configuration via `txnlab.toml`
//!
//! Scenario data that the protocols and detector rules depend on lives here
//! rather than in code: the seed rows reset before every run, the write-skew
//! invariant floor and the phantom range predicate. Absent fields take their
//! defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use txnlab_core::{Error, RangePredicate, RecordKey, Result, SumInvariant};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "txnlab.toml";

/// One committed row written before every run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedRow {
    /// Record key, `table:row`
    pub key: String,
    /// Initial balance
    pub value: i64,
}

impl SeedRow {
    fn new(key: &str, value: i64) -> Self {
        Self {
            key: key.to_string(),
            value,
        }
    }
}

/// Write-skew invariant settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteSkewConfig {
    /// Minimum allowed sum of the keys both transactions read
    #[serde(default)]
    pub floor: i64,
}

impl Default for WriteSkewConfig {
    fn default() -> Self {
        Self { floor: 0 }
    }
}

/// Phantom-read range predicate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhantomConfig {
    /// Table scanned
    #[serde(default = "default_table")]
    pub table: String,
    /// Inclusive lower bound on balance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    /// Inclusive upper bound on balance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

fn default_table() -> String {
    "accounts".to_string()
}

impl Default for PhantomConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            min: Some(100),
            max: None,
        }
    }
}

/// Engine configuration loaded from `txnlab.toml`.
///
/// # Example
///
/// ```toml
/// lock_timeout_ms = 5000
/// rendezvous_timeout_ms = 0
///
/// [[seed]]
/// key = "accounts:A"
/// value = 100
///
/// [write_skew]
/// floor = 0
///
/// [phantom]
/// table = "accounts"
/// min = 100
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Store lock-wait timeout in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// How long a context waits at a rendezvous for its counterpart; 0 waits
    /// until the counterpart arrives or fails
    #[serde(default = "default_rendezvous_timeout_ms")]
    pub rendezvous_timeout_ms: u64,
    /// Committed rows written before every run
    #[serde(default = "default_seed")]
    pub seed: Vec<SeedRow>,
    /// Write-skew invariant
    #[serde(default)]
    pub write_skew: WriteSkewConfig,
    /// Phantom-read predicate
    #[serde(default)]
    pub phantom: PhantomConfig,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_rendezvous_timeout_ms() -> u64 {
    0
}

fn default_seed() -> Vec<SeedRow> {
    vec![
        SeedRow::new("accounts:A", 100),
        SeedRow::new("accounts:B", 200),
        SeedRow::new("accounts:C", 150),
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            rendezvous_timeout_ms: default_rendezvous_timeout_ms(),
            seed: default_seed(),
            write_skew: WriteSkewConfig::default(),
            phantom: PhantomConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Store lock-wait timeout
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Rendezvous wait timeout, `None` when disabled
    pub fn rendezvous_timeout(&self) -> Option<Duration> {
        (self.rendezvous_timeout_ms > 0).then(|| Duration::from_millis(self.rendezvous_timeout_ms))
    }

    /// Parsed seed rows
    ///
    /// # Errors
    ///
    /// Returns `Config` if a key is malformed or appears twice.
    pub fn seed_rows(&self) -> Result<Vec<(RecordKey, i64)>> {
        let mut rows: Vec<(RecordKey, i64)> = Vec::with_capacity(self.seed.len());
        for row in &self.seed {
            let key: RecordKey = row
                .key
                .parse()
                .map_err(|e| Error::config(format!("seed row '{}': {}", row.key, e)))?;
            if rows.iter().any(|(k, _)| *k == key) {
                return Err(Error::config(format!("seed row '{}' appears twice", row.key)));
            }
            rows.push((key, row.value));
        }
        Ok(rows)
    }

    /// Seeded value of a key
    pub fn seed_value(&self, key: &RecordKey) -> Option<i64> {
        self.seed
            .iter()
            .find(|row| row.key.parse::<RecordKey>().ok().as_ref() == Some(key))
            .map(|row| row.value)
    }

    /// Phantom-read predicate
    pub fn phantom_predicate(&self) -> RangePredicate {
        RangePredicate {
            table: self.phantom.table.clone(),
            min: self.phantom.min,
            max: self.phantom.max,
        }
    }

    /// Write-skew invariant over the given keys
    pub fn write_skew_invariant(&self, keys: impl IntoIterator<Item = RecordKey>) -> SumInvariant {
        SumInvariant::new(keys, self.write_skew.floor)
    }

    /// Check every field eagerly
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(Error::config("lock_timeout_ms must be positive"));
        }
        self.seed_rows()?;
        self.phantom_predicate()
            .validate()
            .map_err(|e| Error::config(format!("[phantom]: {}", e)))?;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# txnlab engine configuration
#
# Store lock-wait timeout in milliseconds. A transaction waiting longer
# for a row lock is aborted.
lock_timeout_ms = 5000

# How long a transaction context waits for its counterpart at a
# rendezvous point before giving up. 0 disables the timeout: a context
# waits until its counterpart arrives or fails.
rendezvous_timeout_ms = 0

# Committed rows written before every run.
[[seed]]
key = "accounts:A"
value = 100

[[seed]]
key = "accounts:B"
value = 200

[[seed]]
key = "accounts:C"
value = 150

# Write skew: the sum of the rows both transactions read must stay >= floor.
[write_skew]
floor = 0

# Phantom read: range predicate re-evaluated by the reading transaction.
[phantom]
table = "accounts"
min = 100
# max = 1000
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file if it exists, otherwise the defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(true)` if the file was created.
    pub fn write_default_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        std::fs::write(path, Self::default_toml()).map_err(|e| {
            Error::config(format!(
                "Failed to write default config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(true)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_matches_default() {
        let parsed: EngineConfig = toml::from_str(EngineConfig::default_toml()).unwrap();
        assert_eq!(parsed, EngineConfig::default());
        parsed.validate().unwrap();
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn seed_rows_parse() {
        let rows = EngineConfig::default().seed_rows().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], (RecordKey::account("A"), 100));
        assert_eq!(
            EngineConfig::default().seed_value(&RecordKey::account("C")),
            Some(150)
        );
    }

    #[test]
    fn malformed_seed_key_is_config_error() {
        let config: EngineConfig = toml::from_str("[[seed]]\nkey = \"A\"\nvalue = 1\n").unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "Config");
    }

    #[test]
    fn duplicate_seed_key_is_rejected() {
        let config: EngineConfig = toml::from_str(
            "[[seed]]\nkey = \"accounts:A\"\nvalue = 1\n[[seed]]\nkey = \"accounts:A\"\nvalue = 2\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_phantom_range_is_rejected() {
        let config: EngineConfig =
            toml::from_str("[phantom]\ntable = \"accounts\"\nmin = 10\nmax = 5\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rendezvous_timeout_is_off_by_default() {
        let config = EngineConfig::default();
        assert_eq!(config.rendezvous_timeout(), None);
        let config: EngineConfig = toml::from_str("rendezvous_timeout_ms = 250").unwrap();
        assert_eq!(config.rendezvous_timeout(), Some(Duration::from_millis(250)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_lock_timeout_is_rejected() {
        let config: EngineConfig = toml::from_str("lock_timeout_ms = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn write_default_creates_file_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(EngineConfig::write_default_if_missing(&path).unwrap());
        std::fs::write(&path, "lock_timeout_ms = 250\n").unwrap();
        assert!(!EngineConfig::write_default_if_missing(&path).unwrap());
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = EngineConfig::default();
        config.write_skew.floor = 50;
        config.phantom.max = Some(500);
        config.write_to_file(&path).unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.phantom_predicate(), RangePredicate::at_least("accounts", 100));
    }
}
