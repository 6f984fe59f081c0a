//! Marker stored in place of an absent acquisition result

use crate::cache::types::CacheValue;
use std::sync::{Arc, OnceLock};

/// Payload-free marker type; only this module can construct one
#[derive(Debug)]
struct NullObject;

static INSTANCE: OnceLock<CacheValue> = OnceLock::new();

/// The shared sentinel instance
pub fn sentinel() -> CacheValue {
    Arc::clone(INSTANCE.get_or_init(|| Arc::new(NullObject)))
}

/// Identity check against the shared sentinel
pub fn is_sentinel(value: &CacheValue) -> bool {
    INSTANCE
        .get()
        .map_or(false, |instance| Arc::ptr_eq(instance, value))
}
