use serde::Serialize;
use std::fmt;

/// Identifier of a physical chassis, a fixed-length string of ASCII digits.
///
/// A `DeviceId` can only be obtained through [`DeviceId::parse`], so holding
/// one means the value already matched the configured pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Validate `raw` against the `^\d{digits}$` pattern.
    pub fn parse(raw: &str, digits: usize) -> Option<Self> {
        if digits == 0 || raw.len() != digits {
            return None;
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Broker topic for this device under `prefix`, e.g. `CarStatus_001`.
    pub fn topic(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_fixed_length_digits() {
        let id = DeviceId::parse("001", 3).expect("valid id");
        assert_eq!(id.as_str(), "001");
        assert_eq!(id.to_string(), "001");
    }

    #[test]
    fn test_parse_rejects_bad_format() {
        assert!(DeviceId::parse("01", 3).is_none());
        assert!(DeviceId::parse("0001", 3).is_none());
        assert!(DeviceId::parse("00a", 3).is_none());
        assert!(DeviceId::parse("", 3).is_none());
        assert!(DeviceId::parse(" 01", 3).is_none());
        assert!(DeviceId::parse("١٢٣", 3).is_none());
        assert!(DeviceId::parse("123", 0).is_none());
    }

    #[test]
    fn test_topic_is_prefix_plus_id() {
        let id = DeviceId::parse("042", 3).unwrap();
        assert_eq!(id.topic("CarStatus_"), "CarStatus_042");
        assert_eq!(id.topic("CarControl_"), "CarControl_042");
    }
}
