//! Notification values, routing, and the pending store for offline
//! recipients.

mod dispatcher;
mod store;
mod types;

pub use dispatcher::{DeliveryResult, DispatcherStatsSnapshot, NotificationDispatcher};
pub use store::{
    MemoryPendingStore, PendingNotification, PendingStore, PendingStoreStats, StoreError,
};
pub use types::{Notification, NotificationKind};
