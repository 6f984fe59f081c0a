//! Type-qualified cache key generation
//!
//! Composite keys have the shape `ouroboros-cache[<type tag>][<key>]`. The
//! type tag keeps two kinds of values cached under the same short key apart,
//! and the fixed prefix keeps our entries apart from anything else sharing
//! the store.

use crate::cache::types::CacheKey;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Namespace prefix of every generated key
pub const KEY_PREFIX: &str = "ouroboros-cache";

/// Identifies the kind of value stored under a key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct TypeTag(Cow<'static, str>);

impl TypeTag {
    /// Tag derived from the declared Rust type
    ///
    /// Uses [`std::any::type_name`], which is not guaranteed to be unique:
    /// two distinct types sharing a name would share keys, and reading one
    /// through the other fails with a type mismatch until the entry is
    /// removed. Use an explicit [`TypeTag::new`] tag where that matters.
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeTag(Cow::Borrowed(std::any::type_name::<T>()))
    }

    /// Tag with an explicit name
    ///
    /// Names may not contain `[` or `]`, which delimit the key segments.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.contains(['[', ']']) {
            return Err(CacheError::InvalidTag(name));
        }
        Ok(TypeTag(Cow::Owned(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TypeTag {
    type Error = CacheError;

    fn try_from(name: String) -> Result<Self> {
        TypeTag::new(name)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the composite key for `key` under `tag`
pub fn generate(tag: &TypeTag, key: &str) -> CacheKey {
    format!("{}[{}][{}]", KEY_PREFIX, tag, key)
}

/// Check whether `cache_key` was generated for `tag`
///
/// The `][` separator after the tag is part of the match, so a tag that is a
/// textual prefix of another tag (`Foo` vs `FooBar`) never claims the other's
/// keys. Explicit tags cannot contain brackets and type names never contain
/// `][`, so the separator cannot occur inside a tag.
pub fn is_generated_for(tag: &TypeTag, cache_key: &str) -> bool {
    cache_key
        .strip_prefix(KEY_PREFIX)
        .and_then(|rest| rest.strip_prefix('['))
        .and_then(|rest| rest.strip_prefix(tag.as_str()))
        .map_or(false, |rest| rest.starts_with("]["))
}
