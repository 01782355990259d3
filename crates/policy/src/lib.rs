//! User approval of tool calls and the persisted trust set.

pub mod confirmation;
pub mod trust;

pub use confirmation::{
    ChannelConfirmationHandler, ConfirmationHandler, ConfirmationService, PendingConfirmation,
};
pub use trust::{JsonTrustStore, MemoryTrustStore, TrustSnapshot, TrustStore, TrustStoreError};
