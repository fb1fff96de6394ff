//! # Course player configuration
//!
//! This crate provides the configuration of the lesson player core:
//! - Loading configuration from a YAML file
//! - Merging with the embedded default configuration
//! - Environment variable overrides
//! - Typed, validated getters for every tunable of the playback core
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use playerconfig::get_config;
//!
//! let config = get_config();
//! let threshold = config.get_completion_threshold();
//! let poll = config.get_poll_interval();
//! ```

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{info, warn};

// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("courseplayer.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(match Config::load_config("") {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load player configuration, using embedded defaults");
            Config::defaults()
        }
    });
}

const ENV_CONFIG_DIR: &str = "COURSEPLAYER_CONFIG";
const ENV_PREFIX: &str = "COURSEPLAYER_CONFIG__";
const LOCAL_CONFIG_DIR: &str = ".courseplayer";

pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 0.95;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_PROGRESS_WRITE_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_DRIVER_TICK_MS: u64 = 250;
pub const DEFAULT_SKIP_SECONDS: f64 = 10.0;
pub const DEFAULT_VOLUME_STEP: f64 = 0.1;
pub const DEFAULT_ALLOWED_RATES: [f64; 6] = [0.5, 0.75, 1.0, 1.25, 1.5, 2.0];
pub const DEFAULT_LOG_MIN_LEVEL: &str = "info";

/// Generates a getter/setter pair for a millisecond value exposed as a `Duration`.
macro_rules! impl_millis_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Duration {
            let path: &[&str] = $path;
            match self.get_value(path) {
                Ok(Value::Number(n)) if n.as_u64().is_some_and(|ms| ms > 0) => {
                    Duration::from_millis(n.as_u64().unwrap_or($default))
                }
                Ok(other) => {
                    warn!(
                        path = %path.join("."),
                        value = ?other,
                        default_ms = $default,
                        "Invalid interval, using default"
                    );
                    Duration::from_millis($default)
                }
                Err(_) => Duration::from_millis($default),
            }
        }

        pub fn $setter(&self, interval: Duration) -> Result<()> {
            let n = Number::from(interval.as_millis() as u64);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Generates a getter/setter pair for a strictly positive float value.
macro_rules! impl_positive_f64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> f64 {
            let path: &[&str] = $path;
            match self.get_value(path) {
                Ok(Value::Number(n)) if n.as_f64().is_some_and(|v| v.is_finite() && v > 0.0) => {
                    n.as_f64().unwrap_or($default)
                }
                Ok(other) => {
                    warn!(
                        path = %path.join("."),
                        value = ?other,
                        default = $default,
                        "Invalid value, using default"
                    );
                    $default
                }
                Err(_) => $default,
            }
        }

        pub fn $setter(&self, value: f64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Configuration manager for the player core.
///
/// Values live in a YAML tree; typed getters validate what they read and
/// fall back to the built-in default (with a warning) on bad input.
#[derive(Debug)]
pub struct Config {
    path: Option<String>,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().expect("Config mutex poisoned").clone();
        Self {
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Embedded defaults only, no backing file.
    pub fn defaults() -> Self {
        let value: Value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap_or(Value::Null);
        Self {
            path: None,
            data: Mutex::new(Self::lower_keys_value(value)),
        }
    }

    /// Finds the config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> Option<String> {
        if !directory.is_empty() {
            return Some(directory.to_string());
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return Some(env_path);
        }

        if Path::new(LOCAL_CONFIG_DIR).is_dir() {
            return Some(LOCAL_CONFIG_DIR.to_string());
        }

        None
    }

    /// Loads the configuration.
    ///
    /// 1. Determines the configuration directory (argument, `COURSEPLAYER_CONFIG`,
    ///    then `.courseplayer` in the current directory)
    /// 2. Loads the embedded default configuration
    /// 3. Merges `config.yaml` from that directory when present
    /// 4. Applies `COURSEPLAYER_CONFIG__SECTION__KEY` environment overrides
    pub fn load_config(directory: &str) -> Result<Self> {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let path = Self::find_config_dir(directory).map(|dir| {
            Path::new(&dir)
                .join("config.yaml")
                .to_string_lossy()
                .to_string()
        });

        match path.as_deref().map(|p| (p, fs::read(p))) {
            Some((p, Ok(data))) => {
                info!(config_file = %p, "Loaded config file");
                let external: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut value, &Self::lower_keys_value(external));
            }
            Some((p, Err(_))) => {
                info!(config_file = %p, "Config file not found, using default embedded config");
            }
            None => {
                info!("No config directory, using default embedded config");
            }
        }

        let mut value = Self::lower_keys_value(value);
        Self::apply_env_overrides(&mut value, env::vars());

        Ok(Config {
            path,
            data: Mutex::new(value),
        })
    }

    /// Builds a configuration from a YAML document merged over the defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        let external: Value = serde_yaml::from_str(yaml)?;
        merge_yaml(&mut value, &Self::lower_keys_value(external));
        Ok(Config {
            path: None,
            data: Mutex::new(Self::lower_keys_value(value)),
        })
    }

    /// Writes the current configuration back to its `config.yaml`.
    ///
    /// A configuration built without a backing file is not persisted.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = self.data.lock().expect("Config mutex poisoned");
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a value at the given path (e.g. `&["playback", "poll_interval_ms"]`) and saves.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().expect("Config mutex poisoned");
        Self::set_value_internal(&mut data, path, value)?;
        drop(data);
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets the value at the given path.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().expect("Config mutex poisoned");
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides<I>(config: &mut Value, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key_path = stripped.split("__").collect::<Vec<_>>();
            let yaml_value = Self::convert_env_value(&value);
            if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                warn!(env_var = %key, error = %err, "Ignoring config override");
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Fraction of a lesson that counts as watched, in (0, 1].
    pub fn get_completion_threshold(&self) -> f64 {
        match self.get_value(&["playback", "completion_threshold"]) {
            Ok(Value::Number(n)) => match n.as_f64() {
                Some(v) if v > 0.0 && v <= 1.0 => v,
                _ => {
                    warn!(
                        value = %n,
                        default = DEFAULT_COMPLETION_THRESHOLD,
                        "Completion threshold outside (0, 1], using default"
                    );
                    DEFAULT_COMPLETION_THRESHOLD
                }
            },
            _ => DEFAULT_COMPLETION_THRESHOLD,
        }
    }

    pub fn set_completion_threshold(&self, threshold: f64) -> Result<()> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(anyhow!("Completion threshold {threshold} is outside (0, 1]"));
        }
        self.set_value(
            &["playback", "completion_threshold"],
            Value::Number(Number::from(threshold)),
        )
    }

    impl_millis_config!(
        get_poll_interval,
        set_poll_interval,
        &["playback", "poll_interval_ms"],
        DEFAULT_POLL_INTERVAL_MS
    );

    impl_millis_config!(
        get_progress_write_interval,
        set_progress_write_interval,
        &["progress", "write_interval_ms"],
        DEFAULT_PROGRESS_WRITE_INTERVAL_MS
    );

    impl_millis_config!(
        get_driver_tick,
        set_driver_tick,
        &["driver", "tick_ms"],
        DEFAULT_DRIVER_TICK_MS
    );

    impl_positive_f64_config!(
        get_skip_seconds,
        set_skip_seconds,
        &["controls", "skip_seconds"],
        DEFAULT_SKIP_SECONDS
    );

    impl_positive_f64_config!(
        get_volume_step,
        set_volume_step,
        &["controls", "volume_step"],
        DEFAULT_VOLUME_STEP
    );

    /// Playback rates offered to the user, sorted ascending.
    ///
    /// Falls back to the default set when the configured list is missing,
    /// empty, or holds a non-positive value.
    pub fn get_allowed_rates(&self) -> Vec<f64> {
        let configured = match self.get_value(&["playback", "allowed_rates"]) {
            Ok(Value::Sequence(seq)) => seq
                .iter()
                .map(|v| v.as_f64().filter(|r| r.is_finite() && *r > 0.0))
                .collect::<Option<Vec<f64>>>(),
            _ => None,
        };

        match configured {
            Some(mut rates) if !rates.is_empty() => {
                rates.sort_by(|a, b| a.total_cmp(b));
                rates.dedup();
                rates
            }
            _ => {
                warn!("Invalid playback.allowed_rates, using default set");
                DEFAULT_ALLOWED_RATES.to_vec()
            }
        }
    }

    /// URL of the embed API script for a technology (`"youtube"`, `"vimeo"`).
    pub fn get_script_url(&self, technology: &str) -> Result<String> {
        match self.get_value(&["embed", technology, "script_url"])? {
            Value::String(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(anyhow!("embed.{technology}.script_url is not a string")),
        }
    }

    pub fn get_log_min_level(&self) -> String {
        match self.get_value(&["logger", "min_level"]) {
            Ok(Value::String(s)) => s,
            _ => DEFAULT_LOG_MIN_LEVEL.to_string(),
        }
    }

    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["logger", "min_level"], Value::String(level))
    }
}

/// Returns the global configuration instance, loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Recursively merges `external` into `default`.
///
/// Mappings merge key by key; scalars and sequences are replaced.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
