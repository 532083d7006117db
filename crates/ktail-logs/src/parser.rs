use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// SHA-256 digest of a line's message
pub type Fingerprint = [u8; 32];

/// A log line split into the cluster timestamp and the container's message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    pub timestamp: DateTime<Utc>,
    pub message: &'a str,
}

/// Parser for the `<RFC3339Nano timestamp> <message>` lines of a timestamped log stream
pub struct LogParser;

impl LogParser {
    /// Parse a raw line; returns `None` when it does not carry a leading timestamp
    pub fn parse(raw: &str) -> Option<ParsedLine<'_>> {
        let line = Self::trim_line_ending(raw);
        let (ts, message) = line.split_once(' ')?;
        let timestamp = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
        Some(ParsedLine { timestamp, message })
    }

    /// Strip one trailing `\n` and any number of `\r` before it
    pub fn trim_line_ending(raw: &str) -> &str {
        raw.strip_suffix('\n').unwrap_or(raw).trim_end_matches('\r')
    }

    pub fn fingerprint(message: &str) -> Fingerprint {
        let digest = Sha256::digest(message.as_bytes());
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(&digest);
        fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_parse_k8s_timestamp() {
        let parsed = LogParser::parse("2024-01-15T10:30:00.123456789Z some log message\n").unwrap();
        assert_eq!(parsed.message, "some log message");
        assert_eq!(parsed.timestamp.nanosecond(), 123_456_789);
        assert_eq!(
            parsed.timestamp.with_nanosecond(0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_keeps_inner_spaces() {
        let parsed = LogParser::parse("2024-01-15T10:30:00Z  indented  text \r\n").unwrap();
        assert_eq!(parsed.message, " indented  text ");
    }

    #[test]
    fn test_parse_empty_message() {
        let parsed = LogParser::parse("2024-01-15T10:30:00Z \n").unwrap();
        assert_eq!(parsed.message, "");
    }

    #[test]
    fn test_parse_rejects_missing_timestamp() {
        assert!(LogParser::parse("just a message\n").is_none());
        assert!(LogParser::parse("2024-01-15T10:30:00Z").is_none());
        assert!(LogParser::parse("").is_none());
        assert!(LogParser::parse("───── 2024-01-15T10:30:00Z").is_none());
    }

    #[test]
    fn test_trim_line_ending() {
        assert_eq!(LogParser::trim_line_ending("abc\r\r\n"), "abc");
        assert_eq!(LogParser::trim_line_ending("abc"), "abc");
        assert_eq!(LogParser::trim_line_ending("abc\n\n"), "abc\n");
    }

    #[test]
    fn test_fingerprint_depends_on_message_only() {
        let a = LogParser::parse("2024-01-15T10:30:00Z hello\n").unwrap();
        let b = LogParser::parse("2024-01-15T10:31:00Z hello\n").unwrap();
        assert_eq!(
            LogParser::fingerprint(a.message),
            LogParser::fingerprint(b.message)
        );
        assert_ne!(LogParser::fingerprint("hello"), LogParser::fingerprint("hello!"));
    }
}
