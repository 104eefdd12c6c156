// Topic layout shared with the temperature controllers

use crate::error::PatternError;

pub const ROOT: &str = "ald/temperature";

/// Every controller publishes its telemetry one level below `ROOT`.
pub const TELEMETRY_WILDCARD: &str = "ald/temperature/+";

/// Single topic carrying the aggregate set-point batch.
pub const CONTROL_TOPIC: &str = "ald/temperature/set/temperature";

pub fn telemetry_topic(device_id: &str) -> String {
    format!("{}/{}", ROOT, device_id)
}

/// A subscription pattern of literal segments followed by one trailing `+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    prefix: Vec<String>,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let mut segments: Vec<&str> = pattern.split('/').collect();
        if segments.last() != Some(&"+") {
            return Err(PatternError::MissingWildcard(pattern.to_string()));
        }
        segments.pop();

        let mut prefix = Vec::with_capacity(segments.len());
        for seg in segments {
            if seg.is_empty() {
                return Err(PatternError::EmptySegment(pattern.to_string()));
            }
            if seg.contains('+') || seg.contains('#') {
                return Err(PatternError::UnsupportedWildcard(pattern.to_string()));
            }
            prefix.push(seg.to_string());
        }

        Ok(Self { raw: pattern.to_string(), prefix })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the segment occupying the wildcard position, or `None` when the
    /// topic does not have exactly this pattern's shape.
    pub fn device_id<'t>(&self, topic: &'t str) -> Option<&'t str> {
        let mut parts = topic.split('/');
        for fixed in &self.prefix {
            if parts.next()? != fixed.as_str() {
                return None;
            }
        }
        let last = parts.next()?;
        if last.is_empty() || parts.next().is_some() {
            return None;
        }
        Some(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_trailing_segment() {
        let p = TopicPattern::parse(TELEMETRY_WILDCARD).unwrap();
        assert_eq!(p.device_id("ald/temperature/pump1"), Some("pump1"));
        assert_eq!(p.device_id(&telemetry_topic("oven")), Some("oven"));
    }

    #[test]
    fn rejects_foreign_and_misshapen_topics() {
        let p = TopicPattern::parse(TELEMETRY_WILDCARD).unwrap();
        assert_eq!(p.device_id("ald/pressure/pump1"), None);
        assert_eq!(p.device_id("ald/temperature"), None);
        assert_eq!(p.device_id("ald"), None);
        assert_eq!(p.device_id("ald/temperature/"), None);
        // the control topic is two levels deep and must never route as telemetry
        assert_eq!(p.device_id(CONTROL_TOPIC), None);
    }

    #[test]
    fn bare_wildcard_matches_any_single_segment() {
        let p = TopicPattern::parse("+").unwrap();
        assert_eq!(p.device_id("pump1"), Some("pump1"));
        assert_eq!(p.device_id("a/b"), None);
    }

    #[test]
    fn invalid_patterns() {
        assert!(matches!(TopicPattern::parse("ald/temperature"), Err(PatternError::MissingWildcard(_))));
        assert!(matches!(TopicPattern::parse("ald/#"), Err(PatternError::MissingWildcard(_))));
        assert!(matches!(TopicPattern::parse("ald/+/+"), Err(PatternError::UnsupportedWildcard(_))));
        assert!(matches!(TopicPattern::parse("ald//+"), Err(PatternError::EmptySegment(_))));
    }
}
