//! Resource limits for sandbox execution.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits applied to each command run in a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecLimits {
    /// Wall-clock timeout per command.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Per-stream output ceiling in bytes. Output beyond the ceiling is
    /// dropped; the response keeps exactly the retained prefix and flags
    /// the truncation.
    pub max_output_bytes: u64,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            max_output_bytes: 1024 * 1024, // 1 MB per stream
        }
    }
}

/// Helper for serializing Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ExecLimits::default();
        assert_eq!(limits.timeout, Duration::from_millis(30_000));
        assert_eq!(limits.max_output_bytes, 1024 * 1024);
    }

    #[test]
    fn test_serialization_format() {
        let limits = ExecLimits {
            timeout: Duration::from_millis(5000),
            max_output_bytes: 512,
        };
        let json = serde_json::to_string(&limits).unwrap();
        // Timeout should be serialized as milliseconds
        assert!(json.contains("\"timeout\":5000"));

        let back: ExecLimits = serde_json::from_str(&json).unwrap();
        assert_eq!(back.timeout, Duration::from_millis(5000));
        assert_eq!(back.max_output_bytes, 512);
    }
}
