//! Layered daemon configuration.
//!
//! Merge order, later wins:
//! 1. compiled defaults
//! 2. `/etc/attendanced/attendanced.toml`
//! 3. `./attendanced.toml`
//! 4. the file given with `--config`
//! 5. `ATTENDANCED_*` environment variables

use crate::calc::{PerformancePolicy, RiskPolicy};
use crate::codec::{AesGcmCodec, ContactCodec, PlainCodec};
use crate::error::{CoreError, CoreResult};
use crate::notify::{LogNotifier, Notifier, WhatsAppNotifier};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const SYSTEM_CONFIG: &str = "/etc/attendanced/attendanced.toml";
pub const LOCAL_CONFIG: &str = "attendanced.toml";
const ENV_PREFIX: &str = "ATTENDANCED_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttendanceConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Database opened at start-up. Without it the daemon waits for
    /// `workspace.select`.
    pub database_path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecConfig {
    /// Base64 of a 32-byte AES-256 key.
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    #[default]
    Log,
    Whatsapp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::Log,
            base_url: "http://localhost:3000".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub high_risk_below: f64,
    pub low_turnout_below: f64,
    pub frequent_absence_min: u64,
    pub performance: PerformancePolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let risk = RiskPolicy::default();
        Self {
            high_risk_below: risk.high_risk_below,
            low_turnout_below: risk.low_turnout_below,
            frequent_absence_min: risk.frequent_absence_min,
            performance: PerformancePolicy::default(),
        }
    }
}

impl PolicyConfig {
    pub fn risk(&self) -> RiskPolicy {
        RiskPolicy {
            high_risk_below: self.high_risk_below,
            low_turnout_below: self.low_turnout_below,
            frequent_absence_min: self.frequent_absence_min,
        }
    }
}

/// Maps a lowercased, prefix-stripped variable name onto a dotted key.
/// `POLICY_PERFORMANCE_QUIZ_WEIGHT` becomes `policy.performance.quiz_weight`.
pub fn env_key(key: &str) -> String {
    for section in ["policy_performance_", "storage_", "log_", "codec_", "notifier_", "policy_"] {
        if let Some(rest) = key.strip_prefix(section) {
            return format!("{}.{}", section.trim_end_matches('_').replace('_', "."), rest);
        }
    }
    key.to_string()
}

fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX).map(|key| env_key(key.as_str()).into())
}

pub fn figment(explicit: Option<&Path>) -> Figment {
    let mut f = Figment::new()
        .merge(Serialized::defaults(AttendanceConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG))
        .merge(Toml::file(LOCAL_CONFIG));
    if let Some(path) = explicit {
        f = f.merge(Toml::file(path));
    }
    f.merge(env_provider())
}

pub fn load(explicit: Option<&Path>) -> Result<AttendanceConfig, figment::Error> {
    figment(explicit).extract()
}

pub fn load_from_str(toml: &str) -> Result<AttendanceConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AttendanceConfig::default()))
        .merge(Toml::string(toml))
        .extract()
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn percent(field: &str, v: f64) -> CoreResult<()> {
    if !(0.0..=100.0).contains(&v) {
        return Err(CoreError::validation(field, "must be between 0 and 100"));
    }
    Ok(())
}

/// Rejects values that would only fail later at run time.
pub fn validate(cfg: &AttendanceConfig) -> CoreResult<()> {
    if cfg.storage.busy_timeout_ms == 0 {
        return Err(CoreError::validation("storage.busy_timeout_ms", "must be positive"));
    }
    if !LEVELS.contains(&cfg.log.level.to_ascii_lowercase().as_str()) {
        return Err(CoreError::validation(
            "log.level",
            format!("must be one of {}", LEVELS.join(", ")),
        ));
    }
    if let Some(key) = &cfg.codec.key {
        AesGcmCodec::from_base64(key)?;
    }
    if cfg.notifier.kind == NotifierKind::Whatsapp
        && !(cfg.notifier.base_url.starts_with("http://")
            || cfg.notifier.base_url.starts_with("https://"))
    {
        return Err(CoreError::validation("notifier.base_url", "must be an http(s) URL"));
    }
    if !(1..=300).contains(&cfg.notifier.timeout_secs) {
        return Err(CoreError::validation("notifier.timeout_secs", "must be between 1 and 300"));
    }
    percent("policy.high_risk_below", cfg.policy.high_risk_below)?;
    percent("policy.low_turnout_below", cfg.policy.low_turnout_below)?;
    if cfg.policy.frequent_absence_min == 0 {
        return Err(CoreError::validation("policy.frequent_absence_min", "must be at least 1"));
    }
    if cfg.policy.performance.max_score <= 0.0 {
        return Err(CoreError::validation("policy.performance.max_score", "must be positive"));
    }
    Ok(())
}

impl AttendanceConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.busy_timeout_ms)
    }

    /// Without a key, contact fields are stored as plain text.
    pub fn build_codec(&self) -> CoreResult<Box<dyn ContactCodec>> {
        match &self.codec.key {
            Some(key) => Ok(Box::new(AesGcmCodec::from_base64(key)?)),
            None => {
                warn!("no codec key configured; contact fields are stored unencrypted");
                Ok(Box::new(PlainCodec))
            }
        }
    }

    pub fn build_notifier(&self) -> CoreResult<Box<dyn Notifier>> {
        match self.notifier.kind {
            NotifierKind::Log => Ok(Box::new(LogNotifier)),
            NotifierKind::Whatsapp => Ok(Box::new(WhatsAppNotifier::new(
                &self.notifier.base_url,
                Duration::from_secs(self.notifier.timeout_secs),
            )?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn defaults_are_valid() {
        let cfg = AttendanceConfig::default();
        validate(&cfg).unwrap();
        assert_eq!(cfg.storage.busy_timeout_ms, 5000);
        assert_eq!(cfg.notifier.kind, NotifierKind::Log);
        assert_eq!(cfg.policy.risk(), RiskPolicy::default());
    }

    #[test]
    fn toml_overrides_sections() {
        let cfg = load_from_str(
            r#"
[storage]
database_path = "/tmp/school.sqlite3"

[notifier]
kind = "whatsapp"
base_url = "http://10.0.0.5:3000"

[policy]
high_risk_below = 60.0

[policy.performance]
quiz_weight = 0.5
"#,
        )
        .unwrap();
        assert_eq!(
            cfg.storage.database_path.as_deref(),
            Some(Path::new("/tmp/school.sqlite3"))
        );
        assert_eq!(cfg.storage.busy_timeout_ms, 5000);
        assert_eq!(cfg.notifier.kind, NotifierKind::Whatsapp);
        assert_eq!(cfg.policy.risk().high_risk_below, 60.0);
        assert_eq!(cfg.policy.risk().low_turnout_below, 50.0);
        assert_eq!(cfg.policy.performance.quiz_weight, 0.5);
        assert_eq!(cfg.policy.performance.points_per_session, 2.0);
        validate(&cfg).unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(load_from_str("[storage]\ndatabse_path = \"x\"\n").is_err());
    }

    #[test]
    fn env_keys_map_to_sections() {
        assert_eq!(env_key("storage_busy_timeout_ms"), "storage.busy_timeout_ms");
        assert_eq!(env_key("codec_key"), "codec.key");
        assert_eq!(env_key("policy_high_risk_below"), "policy.high_risk_below");
        assert_eq!(
            env_key("policy_performance_quiz_weight"),
            "policy.performance.quiz_weight"
        );

        let cfg: AttendanceConfig = Figment::new()
            .merge(Serialized::defaults(AttendanceConfig::default()))
            .merge((env_key("log_level"), "debug"))
            .extract()
            .unwrap();
        assert_eq!(cfg.log.level, "debug");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = AttendanceConfig::default();
        cfg.log.level = "loud".to_string();
        assert_eq!(validate(&cfg).unwrap_err().kind(), ErrorKind::ValidationError);

        let mut cfg = AttendanceConfig::default();
        cfg.codec.key = Some("c2hvcnQ=".to_string());
        assert_eq!(validate(&cfg).unwrap_err().kind(), ErrorKind::ValidationError);

        let mut cfg = AttendanceConfig::default();
        cfg.policy.low_turnout_below = 120.0;
        assert!(validate(&cfg).is_err());

        let mut cfg = AttendanceConfig::default();
        cfg.notifier.kind = NotifierKind::Whatsapp;
        cfg.notifier.base_url = "localhost:3000".to_string();
        assert!(validate(&cfg).is_err());
    }
}
