//! Background maintenance for the cache.

pub(crate) mod janitor;
