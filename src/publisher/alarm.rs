//! Sleep as Android alarm records and where they come from

use super::PublisherError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One alarm as exported by Sleep as Android
///
/// Field names and the 0/1 encoding of the flags match the app's own export,
/// so the published JSON can be consumed by existing Home Assistant templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRecord {
    pub hour: u8,
    pub minutes: u8,
    /// Bitmask, Monday is bit 0
    #[serde(default)]
    pub days_of_week: u8,
    /// Next trigger time in epoch milliseconds
    #[serde(default)]
    pub alarm_time: i64,
    #[serde(with = "flag")]
    pub enabled: bool,
    #[serde(with = "flag", default)]
    pub vibrate: bool,
    #[serde(default)]
    pub message: String,
    /// Alert sound reference
    #[serde(default)]
    pub alert: String,
    #[serde(default)]
    pub suspend_time: i64,
    /// Minutes before the alarm in which light sleep triggers it
    #[serde(default)]
    pub non_deep_sleep_wakeup_window: u32,
}

impl AlarmRecord {
    /// Enabled alarm at `hour:minutes` with every other field unset
    pub fn new(hour: u8, minutes: u8) -> Self {
        Self {
            hour,
            minutes,
            days_of_week: 0,
            alarm_time: 0,
            enabled: true,
            vibrate: false,
            message: String::new(),
            alert: String::new(),
            suspend_time: 0,
            non_deep_sleep_wakeup_window: 0,
        }
    }

    pub fn with_days(mut self, days_of_week: u8) -> Self {
        self.days_of_week = days_of_week;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether the alarm repeats on `day` (0 = Monday)
    pub fn repeats_on(&self, day: u8) -> bool {
        day < 7 && self.days_of_week & (1 << day) != 0
    }

    fn validate(&self) -> Result<(), String> {
        if self.hour > 23 {
            return Err(format!("hour out of range: {}", self.hour));
        }
        if self.minutes > 59 {
            return Err(format!("minutes out of range: {}", self.minutes));
        }
        if self.days_of_week >= 1 << 7 {
            return Err(format!("invalid days-of-week mask: {:#x}", self.days_of_week));
        }
        Ok(())
    }
}

/// Sort by time of day, the order the alarm app lists them in (pure function)
pub fn sort_alarms(alarms: &mut [AlarmRecord]) {
    alarms.sort_by_key(|alarm| (alarm.hour, alarm.minutes));
}

/// Flags are written as 0/1 and read from either integers or booleans
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Bool(bool),
        Int(i64),
    }

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Bool(value) => value,
            Repr::Int(value) => value != 0,
        })
    }
}

/// Supplies the current alarm list
#[async_trait]
pub trait AlarmSource: Send + Sync {
    async fn fetch_alarms(&self) -> Result<Vec<AlarmRecord>, PublisherError>;
}

/// Reads alarms from a JSON array on disk, e.g. an export from the phone
#[derive(Debug, Clone)]
pub struct JsonFileAlarmSource {
    path: PathBuf,
}

impl JsonFileAlarmSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse and validate an alarm list (pure function)
    pub fn parse(content: &str) -> Result<Vec<AlarmRecord>, PublisherError> {
        let mut alarms: Vec<AlarmRecord> = serde_json::from_str(content)?;
        for alarm in &alarms {
            alarm.validate().map_err(PublisherError::Source)?;
        }
        sort_alarms(&mut alarms);
        Ok(alarms)
    }
}

#[async_trait]
impl AlarmSource for JsonFileAlarmSource {
    async fn fetch_alarms(&self) -> Result<Vec<AlarmRecord>, PublisherError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            PublisherError::Source(format!(
                "failed to read alarms from {}: {e}",
                self.path.display()
            ))
        })?;

        let alarms = Self::parse(&content)?;
        debug!(path = %self.path.display(), count = alarms.len(), "Loaded alarms");
        Ok(alarms)
    }
}
