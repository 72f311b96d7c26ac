//! Entity-namespaced cache keys.
//!
//! A [`CacheKey`] can only be built from an [`EntityType`] and an identity
//! string, so every key lands in exactly one namespace and a
//! [`CachePrefix`] flush cannot reach another entity type.

use alpaca_core::{EntityType, ListQuery};
use uuid::Uuid;

/// Separator between the namespace and the identity part of a key.
const SEPARATOR: char = ':';

/// A cache key in the `"<entity-prefix>:<identity>"` layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Private inner data - cannot be constructed externally
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    entity_type: EntityType,
    identity: String,
}

impl CacheKey {
    pub fn new(entity_type: EntityType, identity: impl Into<String>) -> Self {
        Self {
            inner: CacheKeyInner {
                entity_type,
                identity: identity.into(),
            },
        }
    }

    /// Key of a list envelope for an instruction-record query.
    pub fn for_list(query: &ListQuery) -> Self {
        Self::new(EntityType::InstructionRecord, query.fingerprint())
    }

    /// Key of a single entity.
    pub fn for_entity(entity_type: EntityType, id: Uuid) -> Self {
        Self::new(entity_type, id.to_string())
    }

    pub fn entity_type(&self) -> EntityType {
        self.inner.entity_type
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Namespace this key belongs to.
    pub fn prefix(&self) -> CachePrefix {
        CachePrefix::new(self.inner.entity_type)
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{}{}",
            self.inner.entity_type.cache_prefix(),
            SEPARATOR,
            self.inner.identity
        )
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// All keys of one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CachePrefix {
    entity_type: EntityType,
}

impl CachePrefix {
    pub fn new(entity_type: EntityType) -> Self {
        Self { entity_type }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Encoded prefix including the trailing separator.
    pub fn encode(&self) -> String {
        format!("{}{}", self.entity_type.cache_prefix(), SEPARATOR)
    }

    pub fn matches(&self, encoded_key: &str) -> bool {
        encoded_key.starts_with(&self.encode())
    }
}

impl std::fmt::Display for CachePrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}
