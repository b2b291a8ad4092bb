//! Process-local cache, counter, and lock primitives.
//!
//! Every subsystem that needs shared mutable state goes through this crate:
//! the scope cache with version-counter invalidation, webhook/outbound dedup
//! keys, the subscription-gate suppression window, sliding-window rate
//! limits, and the per-conversation advisory lock.

pub mod counters;
pub mod locks;
pub mod ttl;
pub mod window;

pub use counters::VersionCounters;
pub use locks::{LockRegistry, LockTimeout};
pub use ttl::TtlCache;
pub use window::SlidingWindow;
