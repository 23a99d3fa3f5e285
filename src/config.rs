//! Configuration management

use std::{collections::BTreeMap, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::service::CallKind;
use crate::{Error, Result};

/// Environment variable prefix; nested keys are split on `__`
pub const ENV_PREFIX: &str = "RPC_TRANSFORM_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Per-method configuration, keyed by method name
    pub methods: BTreeMap<String, MethodConfig>,
}

/// Service-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name (used in logs)
    pub name: String,
    /// Default per-call timeout
    #[serde(with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "TransformService".to_string(),
            timeout: None,
        }
    }
}

/// Settings for one method
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodConfig {
    /// Call shape
    pub kind: CallKind,
    /// Operation to invoke on the handler's response, if any
    pub transform: Option<String>,
    /// Per-call timeout overriding the service default
    #[serde(with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::extract(&figment)
    }

    /// Parse configuration from a YAML string (no environment overrides)
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed or fails validation.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::extract(&Figment::from(Yaml::string(yaml)))
    }

    fn extract(figment: &Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending entry, in method
    /// name order.
    pub fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            return Err(Error::Config("service.name must not be empty".to_string()));
        }
        for (method, config) in &self.methods {
            if method.trim().is_empty() {
                return Err(Error::Config("method names must not be empty".to_string()));
            }
            if config
                .transform
                .as_deref()
                .is_some_and(|op| op.trim().is_empty())
            {
                return Err(Error::Config(format!(
                    "methods.{method}.transform must be a non-empty operation name"
                )));
            }
        }
        Ok(())
    }

    /// Methods that install a transform, with their operation names
    pub fn transformed_methods(&self) -> impl Iterator<Item = (&str, &str)> {
        self.methods
            .iter()
            .filter_map(|(m, c)| c.transform.as_deref().map(|op| (m.as_str(), op)))
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Durations are written as bare integers (seconds) or suffixed strings
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    impl Raw {
        fn into_duration(self) -> Result<Duration, String> {
            match self {
                Self::Secs(secs) => Ok(Duration::from_secs(secs)),
                Self::Text(s) => parse(&s),
            }
        }
    }

    /// Serialize Duration to a human-readable string, keeping millisecond precision
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the duration has a sub-millisecond
    /// part, which the string format cannot carry.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() % 1_000_000 != 0 {
            return Err(serde::ser::Error::custom(format!(
                "duration {duration:?} is not a whole number of milliseconds"
            )));
        }
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a duration string (e.g., "30s", "5m", "100ms") or bare seconds
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Raw::deserialize(deserializer)?
            .into_duration()
            .map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "100ms" or bare seconds
    ///
    /// # Errors
    ///
    /// Returns a message if the numeric part is invalid or the duration
    /// overflows.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let number = |n: &str| {
            n.trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid duration '{s}': {e}"))
        };
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            number(mins)?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration '{s}' is out of range"))
        } else {
            number(s).map(Duration::from_secs)
        }
    }

    /// Same format for `Option<Duration>`
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        use super::Raw;

        /// Serialize `Some` as a duration string, `None` as null
        ///
        /// # Errors
        ///
        /// Returns a serialization error if the serializer fails or the
        /// duration has a sub-millisecond part.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration string or bare seconds
        ///
        /// # Errors
        ///
        /// Returns a deserialization error if the value cannot be parsed as a duration.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<Raw>::deserialize(deserializer)?
                .map(Raw::into_duration)
                .transpose()
                .map_err(serde::de::Error::custom)
        }
    }
}
