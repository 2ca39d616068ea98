//! On-chain activity feed
//!
//! One ordered sequence of Transfer/Approval records for a single
//! token, populated by a one-shot historical scan and kept current by a
//! live log subscription. Every record carries a timestamp resolved
//! from its block before it becomes visible to readers.

pub mod backfill;
pub mod error;
pub mod event;
pub mod live;
pub mod normalize;
pub mod session;
pub mod store;
pub mod timestamp;

pub use backfill::BackfillScanner;
pub use error::FeedError;
pub use event::{ActivityRecord, NormalizedEvent};
pub use live::LiveMerger;
pub use normalize::normalize;
pub use session::FeedSession;
pub use store::FeedStore;
pub use timestamp::TimestampResolver;
