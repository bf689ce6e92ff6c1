//! Persistent dependency cache
//!
//! Installed dependency trees live under content-addressed directories:
//!
//! ```text
//! <root>/<runtime>/<hash>/
//!     package.json
//!     scrun-entry.json
//!     node_modules/
//!     .scrun-complete
//! ```
//!
//! # Cache States
//!
//! | State | Marker | Description |
//! |-------|--------|-------------|
//! | Miss | - | No directory, install into staging |
//! | Building | absent | Crashed or interrupted, rebuilt |
//! | Complete | present | Finalized, immutable |
//!
//! Population happens in a private staging directory that is renamed onto
//! the entry path once the marker is written. Concurrent first runs may both
//! install; the loser discards its staging copy. Old entries are never
//! removed automatically.

pub mod key;
pub mod store;

pub use key::{CacheKey, DependencySet};
pub use store::{CacheEntry, CacheState, CacheStore, EntryMetadata, InstallObserver};
#[cfg(test)]
pub use store::Silent;
