//! Shared serde helpers for configuration types

/// Durations as seconds.
///
/// Whole seconds serialize as integers; fractional values (e.g. `0.25`) are
/// accepted and emitted as floats so short route timeouts stay expressible
/// in TOML.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "kb_core::config::serde_utils::duration_secs")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Whole(u64),
        Fractional(f64),
    }

    /// Serialize a Duration as seconds
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    /// Deserialize a Duration from integer or fractional seconds
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Seconds::deserialize(deserializer)? {
            Seconds::Whole(secs) => Ok(Duration::from_secs(secs)),
            Seconds::Fractional(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|_| de::Error::custom(format!("invalid duration: {} seconds", secs))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        #[serde(with = "duration_secs")]
        timeout: Duration,
    }

    #[test]
    fn test_whole_seconds() {
        let config = TestConfig {
            timeout: Duration::from_secs(30),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"timeout":30}"#);

        let parsed: TestConfig = serde_json::from_str(r#"{"timeout":60}"#).unwrap();
        assert_eq!(parsed.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_fractional_seconds() {
        let parsed: TestConfig = toml::from_str("timeout = 0.25").unwrap();
        assert_eq!(parsed.timeout, Duration::from_millis(250));

        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, r#"{"timeout":0.25}"#);
    }

    #[test]
    fn test_negative_seconds_rejected() {
        assert!(toml::from_str::<TestConfig>("timeout = -1.5").is_err());
    }
}
