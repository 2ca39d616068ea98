//! Feed-level error kinds
//!
//! Three failure domains with different blast radii: a failed
//! historical query aborts the whole backfill, a failed block lookup
//! drops only the events in that block, and a failed live delivery is
//! logged without touching the subscription.

#[derive(Debug)]
pub enum FeedError {
    /// Historical scan query failed; partial history without full block
    /// coverage is misleading, so the whole backfill aborts.
    Query {
        what: String,
        source: anyhow::Error,
    },
    /// A single block lookup failed; events referencing that block are
    /// dropped and the rest of the feed stays consistent.
    BlockResolution {
        block_number: u64,
        source: anyhow::Error,
    },
    /// A live delivery could not be processed; the subscription stays up.
    Subscription { detail: String },
}

impl FeedError {
    pub fn query(what: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Query {
            what: what.into(),
            source,
        }
    }

    pub fn block_resolution(block_number: u64, source: anyhow::Error) -> Self {
        Self::BlockResolution {
            block_number,
            source,
        }
    }

    pub fn subscription(detail: impl Into<String>) -> Self {
        Self::Subscription {
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query { what, source } => {
                write!(f, "historical scan failed ({}): {:#}", what, source)
            }
            Self::BlockResolution {
                block_number,
                source,
            } => {
                write!(f, "block {} lookup failed: {:#}", block_number, source)
            }
            Self::Subscription { detail } => {
                write!(f, "live subscription failure: {}", detail)
            }
        }
    }
}

impl std::error::Error for FeedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = FeedError::query("transfer logs", anyhow::anyhow!("connection refused"));
        let msg = err.to_string();
        assert!(msg.contains("transfer logs"));
        assert!(msg.contains("connection refused"));

        let err = FeedError::block_resolution(42, anyhow::anyhow!("timeout"));
        assert!(err.to_string().contains("block 42"));
    }
}
