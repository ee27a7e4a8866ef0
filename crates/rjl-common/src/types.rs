//! Protocol constants and small shared helpers.

/// TCP port the relay listens on when none is configured.
pub const DEFAULT_PORT: u16 = 8122;

/// Separator between fields of one wire record.
pub const FIELD_SEPARATOR: char = '\t';

/// Terminator of one wire record.
pub const RECORD_TERMINATOR: u8 = b'\n';

/// Default upper bound on a single wire record, terminator excluded.
pub const DEFAULT_MAX_LINE: usize = 4096;

/// Text carried by the ACK frame sent in reply to a processed REPORT.
pub const ACK_ACCEPTED: &str = "Accepted";

/// Wire keywords identifying each frame kind.
pub mod keyword {
    /// Add a host to the reject list.
    pub const ADD: &str = "ADD";
    /// Remove a host from the reject list.
    pub const REMOVE: &str = "REMOVE";
    /// Client decision report.
    pub const REPORT: &str = "REPORT";
    /// Server acknowledgement.
    pub const ACK: &str = "ACK";
}

/// Returns the trimmed host if it is usable as a reject-list entry.
///
/// A usable host is non-empty and contains no whitespace or control
/// characters, so it can never break the line framing.
#[must_use]
pub fn normalize_host(raw: &str) -> Option<&str> {
    let host = raw.trim();
    if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return None;
    }
    Some(host)
}

/// Current unix time in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
