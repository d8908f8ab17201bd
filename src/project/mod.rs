//! Project-facing collaborators: the cached active-check (K) and the
//! API-key lookup (L) that feed the proxy pipeline's admission and
//! upstream-dispatch steps.

pub mod active_cache;
pub mod keys;

pub use active_cache::ProjectActiveCache;
pub use keys::ProjectKeyLookup;
