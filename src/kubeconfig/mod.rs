mod document;
mod merge;
mod rewrite;
mod store;

pub use document::CredentialDocument;
pub use merge::{merge, MergeOutcome, MergeSummary};
pub use rewrite::rewrite_document;
pub use store::{list_backups, StoreFile};

#[cfg(test)]
pub(crate) use document::fixtures;
