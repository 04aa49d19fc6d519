//! Deployment configuration loaded from `binwatch.toml`.
//!
//! Every field has a default, so the file is optional. Deployment-specific
//! values can be overridden from the environment:
//! `BINWATCH_MODEM_PORT`, `BINWATCH_SMSC`, `BINWATCH_PUSH_URL`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::modem::SessionSettings;
use crate::tasks::StaffMember;
use crate::telemetry::{BinInfo, ThresholdBands};

pub const DEFAULT_PATH: &str = "binwatch.toml";
const MAX_SEGMENTS_LIMIT: u8 = 4;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BinwatchConfig {
    #[serde(default)]
    pub modem: ModemConfig,
    #[serde(default)]
    pub thresholds: ThresholdBands,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub assignment: AssignmentConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bins: Vec<BinInfo>,
    #[serde(default)]
    pub staff: Vec<StaffMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModemConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Carrier SMSC. Unset means use the SIM's stored address.
    #[serde(default)]
    pub smsc: Option<String>,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_open_timeout_ms() -> u64 {
    3000
}

fn default_command_timeout_secs() -> u64 {
    15
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_queue_capacity() -> usize {
    32
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            smsc: None,
            open_timeout_ms: default_open_timeout_ms(),
            command_timeout_secs: default_command_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl ModemConfig {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            smsc: self.smsc.clone(),
            open_timeout: Duration::from_millis(self.open_timeout_ms),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            send_timeout: Duration::from_secs(self.send_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    /// 1 keeps every SMS to a single 160-septet segment.
    #[serde(default = "default_max_segments")]
    pub max_segments: u8,
}

fn default_max_segments() -> u8 {
    1
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            max_segments: default_max_segments(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Webhook receiving push payloads. Unset means log only.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_push_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_push_timeout_secs() -> u64 {
    10
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_push_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignmentConfig {
    /// Assign new automatic tasks to the least-loaded available staff member.
    #[serde(default)]
    pub auto_assign: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// JSON task store. Unset keeps tasks in memory only.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl BinwatchConfig {
    /// Load `path`, or `binwatch.toml` in the working directory when `path` is
    /// `None`. A missing default file yields defaults; a missing explicit file
    /// is an error. Environment overrides apply, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p, true),
            None => (Path::new(DEFAULT_PATH), false),
        };

        let mut config = if required || path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str::<BinwatchConfig>(&contents)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        tracing::debug!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Environment takes precedence over the file for deployment-specific values.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let set = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(port) = set("BINWATCH_MODEM_PORT") {
            self.modem.port = port;
        }
        if let Some(smsc) = set("BINWATCH_SMSC") {
            self.modem.smsc = Some(smsc);
        }
        if let Some(url) = set("BINWATCH_PUSH_URL") {
            self.push.webhook_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate().map_err(ConfigError::Invalid)?;
        if self.sms.max_segments == 0 || self.sms.max_segments > MAX_SEGMENTS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "sms.max_segments must be 1-{MAX_SEGMENTS_LIMIT}, got {}",
                self.sms.max_segments
            )));
        }
        if self.modem.baud_rate == 0 {
            return Err(ConfigError::Invalid("modem.baud_rate must be positive".into()));
        }
        if self.modem.port.trim().is_empty() {
            return Err(ConfigError::Invalid("modem.port is empty".into()));
        }
        for (key, value) in [
            ("modem.open_timeout_ms", self.modem.open_timeout_ms),
            ("modem.command_timeout_secs", self.modem.command_timeout_secs),
            ("modem.send_timeout_secs", self.modem.send_timeout_secs),
            ("push.timeout_secs", self.push.timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be positive")));
            }
        }
        if let Some(smsc) = &self.modem.smsc
            && !is_phone_number(smsc)
        {
            return Err(ConfigError::Invalid(format!("modem.smsc '{smsc}' is not a phone number")));
        }
        let mut ids: Vec<&str> = self.staff.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid(format!("duplicate staff id '{}'", pair[0])));
        }
        Ok(())
    }
}

/// Optional leading `+`, then at least one digit and nothing else.
fn is_phone_number(text: &str) -> bool {
    let digits = text.strip_prefix('+').unwrap_or(text);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Priority;

    #[test]
    fn default_config_values() {
        let config = BinwatchConfig::default();
        assert_eq!(config.modem.port, "/dev/ttyUSB0");
        assert_eq!(config.modem.baud_rate, 115_200);
        assert!(config.modem.smsc.is_none());
        assert_eq!(config.sms.max_segments, 1);
        assert_eq!(config.thresholds.bands.len(), 3);
        assert!(!config.assignment.auto_assign);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let config: BinwatchConfig = toml::from_str(
            r#"
            [modem]
            port = "/dev/ttyACM0"
            smsc = "+12063130004"

            [[bins]]
            id = "bin1"
            location = "Central Plaza"

            [[staff]]
            id = "s-1"
            name = "Ana Reyes"
            phone = "+15550100"
        "#,
        )
        .unwrap();
        assert_eq!(config.modem.port, "/dev/ttyACM0");
        assert_eq!(config.modem.baud_rate, 115_200);
        assert_eq!(config.modem.smsc.as_deref(), Some("+12063130004"));
        assert_eq!(config.bins[0].location.as_deref(), Some("Central Plaza"));
        assert!(config.staff[0].available);
        assert_eq!(config.thresholds.classify(91.0).unwrap().priority, Priority::High);
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binwatch.toml");
        std::fs::write(
            &path,
            r#"
            [sms]
            max_segments = 2

            [assignment]
            auto_assign = true
        "#,
        )
        .unwrap();
        let config = BinwatchConfig::load(Some(&path)).unwrap();
        assert_eq!(config.sms.max_segments, 2);
        assert!(config.assignment.auto_assign);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = BinwatchConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[sms]\nmax_segments = 0\n").unwrap();
        assert!(matches!(
            BinwatchConfig::load(Some(&path)),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = BinwatchConfig::default();
        config.modem.smsc = Some("carrier".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeouts_and_empty_smsc_are_rejected() {
        let cases: [fn(&mut BinwatchConfig); 6] = [
            |c| c.modem.command_timeout_secs = 0,
            |c| c.modem.send_timeout_secs = 0,
            |c| c.modem.open_timeout_ms = 0,
            |c| c.push.timeout_secs = 0,
            |c| c.modem.smsc = Some("+".into()),
            |c| c.modem.smsc = Some("++639".into()),
        ];
        for mutate in cases {
            let mut config = BinwatchConfig::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }

        let mut config = BinwatchConfig::default();
        config.modem.smsc = Some("639170000130".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = BinwatchConfig::default();
        config.apply_env(|key| match key {
            "BINWATCH_MODEM_PORT" => Some("/dev/ttyS3".into()),
            "BINWATCH_SMSC" => Some("+447785016005".into()),
            "BINWATCH_PUSH_URL" => Some("   ".into()),
            _ => None,
        });
        assert_eq!(config.modem.port, "/dev/ttyS3");
        assert_eq!(config.modem.smsc.as_deref(), Some("+447785016005"));
        assert!(config.push.webhook_url.is_none());
    }

    #[test]
    fn modem_settings_carry_timeouts() {
        let settings = ModemConfig::default().session_settings();
        assert_eq!(settings.open_timeout, Duration::from_millis(3000));
        assert_eq!(settings.command_timeout, Duration::from_secs(15));
        assert_eq!(settings.send_timeout, Duration::from_secs(30));
    }
}
