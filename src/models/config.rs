use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::models::UnpickError;

pub const DIGITS: &str = "0123456789";

/// Generated keyspace tried after the word list (charset, inclusive length range)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyspace {
    pub charset: String,
    pub min_len: usize,
    pub max_len: usize,
}

impl Keyspace {
    pub fn new(charset: &str, min_len: usize, max_len: usize) -> Self {
        Self {
            charset: charset.to_string(),
            min_len: min_len.max(1),
            max_len: max_len.max(min_len.max(1)),
        }
    }
}

/// Performance profile chosen once per extraction run
///
/// Controls how many workers test candidates in parallel and how long a
/// single attempt may take before it is counted as a miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceProfile {
    pub name: String,
    pub workers: usize,
    #[serde(with = "millis")]
    pub attempt_timeout: Duration,
    #[serde(default)]
    pub keyspace: Option<Keyspace>,
}

impl PerformanceProfile {
    /// Resolve a profile by name (case-insensitive)
    pub fn from_name(name: &str) -> Result<Self, UnpickError> {
        let cpus = num_cpus::get().max(1);
        let lower = name.trim().to_ascii_lowercase();

        let profile = match lower.as_str() {
            "" | "default" | "balanced" => Self::custom("default", (cpus / 2).max(1), Duration::from_secs(10)),
            "fast" => Self::custom("fast", cpus, Duration::from_secs(3)),
            "thorough" => Self::custom("thorough", cpus, Duration::from_secs(30))
                .with_keyspace(Keyspace::new(DIGITS, 1, 6)),
            "eco" => Self::custom("eco", 1, Duration::from_secs(10)),
            _ => return Err(UnpickError::UnknownProfile(name.to_string())),
        };

        Ok(profile)
    }

    /// Build a profile with explicit settings
    pub fn custom(name: &str, workers: usize, attempt_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            workers: workers.max(1),
            attempt_timeout,
            keyspace: None,
        }
    }

    pub fn with_keyspace(mut self, keyspace: Keyspace) -> Self {
        self.keyspace = Some(keyspace);
        self
    }

    /// Names accepted by [`PerformanceProfile::from_name`]
    pub fn builtin_names() -> &'static [&'static str] {
        &["default", "fast", "thorough", "eco"]
    }
}

impl Default for PerformanceProfile {
    fn default() -> Self {
        Self::custom("default", (num_cpus::get() / 2).max(1), Duration::from_secs(10))
    }
}

/// Engine-wide knobs that are not part of a run's profile
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Capacity of the event channel; producers block when it is full
    pub event_capacity: usize,
    /// How deep to follow archives found inside extracted output (0 disables)
    pub nested_depth: usize,
    /// Append a manually entered password that worked to the password book
    pub remember_manual_passwords: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            nested_depth: 4,
            remember_manual_passwords: true,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
