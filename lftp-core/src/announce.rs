//! Discovery announcement payload: ASCII `"<hostname>|<unix-seconds>"`.

/// Longest device name kept, in bytes.
pub const MAX_NAME_LEN: usize = 64;
/// Receive buffer for one datagram.
pub const MAX_DATAGRAM_LEN: usize = 1024;

const SEPARATOR: char = '|';

/// One presence announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub name: String,
    pub timestamp: u64,
}

impl Announcement {
    /// Build an announcement, sanitising `name` so it round-trips.
    pub fn new(name: &str, timestamp: u64) -> Self {
        Self {
            name: sanitize_name(name),
            timestamp,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}{}{}", self.name, SEPARATOR, self.timestamp)
    }

    pub fn parse(datagram: &[u8]) -> Result<Self, AnnounceError> {
        let text = std::str::from_utf8(datagram).map_err(|_| AnnounceError::NotUtf8)?;
        let (name, ts) = text
            .split_once(SEPARATOR)
            .ok_or(AnnounceError::MissingSeparator)?;
        if name.is_empty() {
            return Err(AnnounceError::EmptyName);
        }
        let timestamp = ts
            .trim_end_matches(['\0', '\n', '\r'])
            .parse::<u64>()
            .map_err(|_| AnnounceError::BadTimestamp)?;
        Ok(Self {
            name: truncate(name, MAX_NAME_LEN).to_string(),
            timestamp,
        })
    }
}

/// Replace separators and control characters, cap at [`MAX_NAME_LEN`] bytes.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == SEPARATOR || c.is_control() { '_' } else { c })
        .collect();
    let cleaned = truncate(&cleaned, MAX_NAME_LEN);
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.to_string()
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Why a datagram was not a valid announcement. Callers normally drop these silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AnnounceError {
    #[error("datagram is not UTF-8")]
    NotUtf8,
    #[error("missing '|' separator")]
    MissingSeparator,
    #[error("empty device name")]
    EmptyName,
    #[error("timestamp is not an integer")]
    BadTimestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_format() {
        let a = Announcement::new("workstation", 1_700_000_000);
        assert_eq!(a.encode(), "workstation|1700000000");
    }

    #[test]
    fn parse_valid() {
        let a = Announcement::parse(b"laptop|1700000123").unwrap();
        assert_eq!(a.name, "laptop");
        assert_eq!(a.timestamp, 1_700_000_123);
    }

    #[test]
    fn parse_tolerates_trailing_nul() {
        let a = Announcement::parse(b"nas|42\0").unwrap();
        assert_eq!(a.timestamp, 42);
    }

    #[test]
    fn parse_rejects_foreign_traffic() {
        assert_eq!(
            Announcement::parse(b"M-SEARCH * HTTP/1.1"),
            Err(AnnounceError::MissingSeparator)
        );
        assert_eq!(Announcement::parse(b"|123"), Err(AnnounceError::EmptyName));
        assert_eq!(
            Announcement::parse(b"host|soon"),
            Err(AnnounceError::BadTimestamp)
        );
        assert_eq!(
            Announcement::parse(&[0xff, 0xfe, b'|', b'1']),
            Err(AnnounceError::NotUtf8)
        );
    }

    #[test]
    fn long_names_truncated() {
        let long = "h".repeat(100);
        let a = Announcement::parse(format!("{long}|1").as_bytes()).unwrap();
        assert_eq!(a.name.len(), MAX_NAME_LEN);
    }

    #[test]
    fn sanitize_strips_separator() {
        let a = Announcement::new("bad|name\n", 7);
        assert_eq!(a.name, "bad_name_");
        assert_eq!(Announcement::parse(a.encode().as_bytes()).unwrap(), a);
        assert_eq!(sanitize_name(""), "unknown");
    }
}
