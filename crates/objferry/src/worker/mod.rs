pub mod dispatcher;
pub mod keys;
pub mod mover;
pub mod pool;
pub mod summary;
pub mod task;
pub mod versioning;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use keys::{normalize_prefix, KeyMapper};
pub use mover::{filter_metadata, EntryOutcome, Mover};
pub use pool::WorkerPool;
pub use summary::{MoveSummary, SummarySnapshot};
pub use task::TransferGroup;
pub use versioning::VersioningGuard;
