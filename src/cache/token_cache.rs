use crate::cache::token::{TokenKind, TokenRecord};

/// True iff the record exists and `now < issued_at + expires_in - threshold`.
///
/// The threshold biases toward early refresh: a token is never handed out
/// inside its last `threshold_seconds` of life.
pub fn is_valid(record: Option<&TokenRecord>, threshold_seconds: u64, now: i64) -> bool {
    record
        .map(|r| now < r.expires_at().saturating_sub(seconds_i64(threshold_seconds)))
        .unwrap_or(false)
}

/// Lifetimes beyond `i64::MAX` seconds saturate instead of wrapping.
pub(crate) fn seconds_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Token state owned by the lifecycle manager.
///
/// Pure state holder: no I/O and no locking of its own, callers serialise
/// access. Each `store` of a primary token bumps the primary generation; a
/// downstream record is only trusted while it carries the current generation.
#[derive(Debug, Default)]
pub struct TokenCache {
    primary: Option<TokenRecord>,
    downstream: Option<TokenRecord>,
    primary_generation: u64,
    last_refresh: Option<i64>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` as the current token of `kind` and return the stored copy.
    pub fn store(&mut self, kind: TokenKind, mut record: TokenRecord) -> &TokenRecord {
        self.last_refresh = Some(record.issued_at);
        match kind {
            TokenKind::Primary => {
                self.primary_generation += 1;
                record.primary_generation = self.primary_generation;
                self.primary.insert(record)
            }
            TokenKind::Downstream => self.downstream.insert(record),
        }
    }

    pub fn get(&self, kind: TokenKind) -> Option<&TokenRecord> {
        match kind {
            TokenKind::Primary => self.primary.as_ref(),
            TokenKind::Downstream => self.downstream.as_ref(),
        }
    }

    /// Clear one kind, or everything when `kind` is `None`.
    ///
    /// Dropping the primary token also retires its generation, so a kept
    /// downstream record is no longer trusted.
    pub fn clear(&mut self, kind: Option<TokenKind>) {
        match kind {
            Some(TokenKind::Primary) => {
                self.primary = None;
                self.primary_generation += 1;
            }
            Some(TokenKind::Downstream) => self.downstream = None,
            None => {
                self.primary = None;
                self.downstream = None;
                self.primary_generation += 1;
                self.last_refresh = None;
            }
        }
    }

    /// FRESH check used by the manager.
    pub fn is_fresh(&self, kind: TokenKind, threshold_seconds: u64, now: i64) -> bool {
        let record = self.get(kind);
        if !is_valid(record, threshold_seconds, now) {
            return false;
        }
        match kind {
            TokenKind::Primary => true,
            TokenKind::Downstream => record
                .map(|r| r.primary_generation == self.primary_generation)
                .unwrap_or(false),
        }
    }

    pub fn primary_generation(&self) -> u64 {
        self.primary_generation
    }

    pub fn last_refresh(&self) -> Option<i64> {
        self.last_refresh
    }
}
