use std::fmt;

use serde::Serialize;

use crate::cache::token_cache::seconds_i64;

/// The two chained tokens held by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// obtained by exchanging a signed assertion
    Primary,
    /// obtained by exchanging the primary token, used for data queries
    Downstream,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Primary => "primary",
            TokenKind::Downstream => "downstream",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A token as returned by an exchange, stamped with the time it was issued.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub access_token: String,
    /// lifetime in seconds, as reported by the identity provider
    pub expires_in: u64,
    /// UNIX timestamp taken right before the exchange call was sent
    pub issued_at: i64,
    pub instance_url: Option<String>,
    /// generation of the primary token this record was derived from
    pub primary_generation: u64,
}

impl TokenRecord {
    pub fn new(access_token: String, expires_in: u64, issued_at: i64, instance_url: Option<String>) -> Self {
        Self {
            access_token,
            expires_in,
            issued_at,
            instance_url,
            primary_generation: 0,
        }
    }

    pub fn expires_at(&self) -> i64 {
        self.issued_at.saturating_add(seconds_i64(self.expires_in))
    }

    /// Seconds of real lifetime left at `now`, never negative.
    pub fn remaining_seconds(&self, now: i64) -> u64 {
        self.expires_at().saturating_sub(now).max(0) as u64
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("issued_at", &self.issued_at)
            .field("instance_url", &self.instance_url)
            .field("primary_generation", &self.primary_generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::token_cache::is_valid;

    #[test]
    fn huge_lifetimes_saturate_instead_of_wrapping() {
        let record = TokenRecord::new("T".into(), u64::MAX, 1_700_000_000, None);
        assert_eq!(record.expires_at(), i64::MAX);
        assert!(record.remaining_seconds(1_700_000_000) > 0);
        assert!(is_valid(Some(&record), 60, 1_700_000_000));
        assert!(is_valid(Some(&record), u64::MAX, i64::MIN));
    }

    #[test]
    fn remaining_seconds_stops_at_zero() {
        let record = TokenRecord::new("T".into(), 100, 1_000, None);
        assert_eq!(record.expires_at(), 1_100);
        assert_eq!(record.remaining_seconds(1_040), 60);
        assert_eq!(record.remaining_seconds(5_000), 0);
    }
}
