//! Runtime configuration
//!
//! Every knob has a default; `from_env` overrides them from `TSUNDOKU_*`
//! variables. Durations use humantime syntax (`90s`, `30m`, `1h 30m`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tsundoku_core::{TsundokuError, TsundokuResult};
use tsundoku_isbn::{ExtractMode, GrammarConfig};
use tsundoku_throttle::{AdmissionConfig, CooldownConfig, DispatchConfig, LifecycleConfig};

/// Where the egress IP in audit records comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EgressSetting {
    Off,
    Stun,
    Fixed(String),
}

impl FromStr for EgressSetting {
    type Err = TsundokuError;

    fn from_str(s: &str) -> TsundokuResult<Self> {
        match s.trim() {
            "" => Err(TsundokuError::Config("empty egress setting".into())),
            v if v.eq_ignore_ascii_case("off") => Ok(EgressSetting::Off),
            v if v.eq_ignore_ascii_case("stun") => Ok(EgressSetting::Stun),
            v => Ok(EgressSetting::Fixed(v.to_string())),
        }
    }
}

/// Log output settings
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Batch pipeline settings
#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub grammar: GrammarConfig,
    /// Deadline for one bibliographic lookup
    pub lookup_timeout: Duration,
    /// Pause between items of one batch
    pub item_pause: Duration,
    /// Format errors quoted in a reply
    pub max_error_examples: usize,
    /// Quantity written to each spreadsheet row
    pub default_quantity: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            grammar: GrammarConfig::default(),
            lookup_timeout: Duration::from_secs(5),
            item_pause: Duration::from_secs(1),
            max_error_examples: 3,
            default_quantity: 1,
        }
    }
}

/// Complete runtime configuration
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Root of the durable store
    pub data_dir: PathBuf,
    /// JSON catalog used as the bibliographic lookup
    pub catalog_path: PathBuf,
    /// CSV file used as the spreadsheet
    pub sheet_path: PathBuf,
    pub egress: EgressSetting,
    pub log: LogConfig,
    pub batch: BatchConfig,
    pub dispatch: DispatchConfig,
    pub cooldown: CooldownConfig,
    pub admission: AdmissionConfig,
    pub lifecycle: LifecycleConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            data_dir: PathBuf::from(".tsundoku"),
            catalog_path: PathBuf::from("catalog.json"),
            sheet_path: PathBuf::from("orders.csv"),
            egress: EgressSetting::Stun,
            log: LogConfig::default(),
            batch: BatchConfig::default(),
            dispatch: DispatchConfig::default(),
            cooldown: CooldownConfig::default(),
            admission: AdmissionConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `TSUNDOKU_*` environment variables
    pub fn from_env() -> TsundokuResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> TsundokuResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TSUNDOKU_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("TSUNDOKU_CATALOG") {
            cfg.catalog_path = PathBuf::from(v);
        }
        if let Some(v) = get("TSUNDOKU_SHEET") {
            cfg.sheet_path = PathBuf::from(v);
        }
        if let Some(v) = get("TSUNDOKU_EGRESS") {
            cfg.egress = v.parse()?;
        }

        if let Some(v) = get("TSUNDOKU_LOG") {
            cfg.log.filter = v;
        }
        if let Some(v) = get("TSUNDOKU_LOG_JSON") {
            cfg.log.json = parse_bool("TSUNDOKU_LOG_JSON", &v)?;
        }

        if let Some(v) = get("TSUNDOKU_EXTRACT_MODE") {
            cfg.batch.grammar.mode = parse_mode(&v)?;
        }
        if let Some(v) = get("TSUNDOKU_LOOKUP_TIMEOUT") {
            cfg.batch.lookup_timeout = parse_duration("TSUNDOKU_LOOKUP_TIMEOUT", &v)?;
        }
        if let Some(v) = get("TSUNDOKU_ITEM_PAUSE") {
            cfg.batch.item_pause = parse_duration("TSUNDOKU_ITEM_PAUSE", &v)?;
        }

        if let Some(v) = get("TSUNDOKU_MAX_ATTEMPTS") {
            cfg.dispatch.max_attempts = parse_number("TSUNDOKU_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("TSUNDOKU_BASE_DELAY") {
            cfg.dispatch.base_delay = parse_duration("TSUNDOKU_BASE_DELAY", &v)?;
        }
        if let Some(v) = get("TSUNDOKU_MAX_JITTER") {
            cfg.dispatch.max_jitter = parse_duration("TSUNDOKU_MAX_JITTER", &v)?;
        }

        if let Some(v) = get("TSUNDOKU_COOLDOWN_MIN") {
            cfg.cooldown.min_wait = parse_duration("TSUNDOKU_COOLDOWN_MIN", &v)?;
        }
        if let Some(v) = get("TSUNDOKU_COOLDOWN_MAX") {
            cfg.cooldown.max_wait = parse_duration("TSUNDOKU_COOLDOWN_MAX", &v)?;
        }

        if let Some(v) = get("TSUNDOKU_STARTUP_CEILING") {
            cfg.admission.ceiling = parse_number("TSUNDOKU_STARTUP_CEILING", &v)?;
        }
        if let Some(v) = get("TSUNDOKU_STARTUP_WINDOW") {
            cfg.admission.window = parse_duration("TSUNDOKU_STARTUP_WINDOW", &v)?;
        }
        if let Some(v) = get("TSUNDOKU_STARTUP_PAUSE") {
            cfg.lifecycle.startup_pause = parse_duration("TSUNDOKU_STARTUP_PAUSE", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject combinations the components cannot honor
    pub fn validate(&self) -> TsundokuResult<()> {
        if self.cooldown.min_wait >= self.cooldown.max_wait {
            return Err(TsundokuError::Config(format!(
                "cooldown minimum {} must be below maximum {}",
                humantime::format_duration(self.cooldown.min_wait),
                humantime::format_duration(self.cooldown.max_wait)
            )));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(TsundokuError::Config("max attempts must be at least 1".into()));
        }
        if self.batch.lookup_timeout.is_zero() {
            return Err(TsundokuError::Config("lookup timeout must be positive".into()));
        }
        if self.admission.ceiling == 0 || self.admission.window.is_zero() {
            return Err(TsundokuError::Config(
                "startup ceiling and window must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_duration(key: &str, value: &str) -> TsundokuResult<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| TsundokuError::Config(format!("{}={:?}: {}", key, value, e)))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> TsundokuResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| TsundokuError::Config(format!("{}={:?}: {}", key, value, e)))
}

fn parse_bool(key: &str, value: &str) -> TsundokuResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TsundokuError::Config(format!(
            "{}={:?}: expected a boolean",
            key, value
        ))),
    }
}

fn parse_mode(value: &str) -> TsundokuResult<ExtractMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "lenient" => Ok(ExtractMode::Lenient),
        "prefixed" | "prefixed-only" => Ok(ExtractMode::PrefixedOnly),
        other => Err(TsundokuError::Config(format!(
            "TSUNDOKU_EXTRACT_MODE={:?}: expected lenient or prefixed",
            other
        ))),
    }
}
