//! Map and set aliases for the manifest indices.
//!
//! With the `gxhash` feature (default) the indices hash with gxhash; without
//! it they fall back to the std hasher so the crate builds on CPUs lacking
//! AES-NI/SSE2. Construct with `Default::default()` in both cases.

#[cfg(feature = "gxhash")]
pub type HashMap<K, V> = gxhash::HashMap<K, V>;

#[cfg(not(feature = "gxhash"))]
pub type HashMap<K, V> = std::collections::HashMap<K, V>;

#[cfg(feature = "gxhash")]
pub type HashSet<T> = gxhash::HashSet<T>;

#[cfg(not(feature = "gxhash"))]
pub type HashSet<T> = std::collections::HashSet<T>;
