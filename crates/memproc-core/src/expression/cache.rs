//! Compiled-expression cache (spec.md §4.4, design note in §9).
//!
//! A `uuid -> (hash, compiled)` map with concurrent-safe insert/remove.
//! Invalidation is a single remove; a failed compiled call evicts the
//! entry and falls back to a fresh compile. Grounded on `dashmap` for the
//! concurrent map (the same crate the pack reaches for elsewhere for
//! lock-free shared state).

use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::ast::Expr;
use super::parser;
use crate::error::MemprocError;

fn hash_expression(src: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(src.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct CacheEntry {
    hash: String,
    compiled: Arc<Expr>,
}

/// Caches one compiled expression per block id, keyed by the sha256 hash
/// of its source text so an edited expression invalidates automatically.
#[derive(Default)]
pub struct ExpressionCache {
    entries: DashMap<Uuid, CacheEntry>,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled form for `block_id`/`source`, recompiling if
    /// the cache is empty, holds no entry for this id, or the stored hash
    /// no longer matches the current source's hash.
    pub fn get_or_compile(&self, block_id: Uuid, source: &str) -> Result<Arc<Expr>, MemprocError> {
        let current_hash = hash_expression(source);

        if let Some(entry) = self.entries.get(&block_id)
            && entry.hash == current_hash
        {
            return Ok(entry.compiled.clone());
        }

        let compiled = Arc::new(parser::parse(source)?);
        self.entries.insert(
            block_id,
            CacheEntry {
                hash: current_hash,
                compiled: compiled.clone(),
            },
        );
        Ok(compiled)
    }

    /// Evicts a block's entry, e.g. after a failed evaluation, so the next
    /// tick recompiles from scratch.
    pub fn evict(&self, block_id: Uuid) {
        self.entries.remove(&block_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recompiles_on_edit() {
        let cache = ExpressionCache::new();
        let id = Uuid::new_v4();

        let compiled = cache.get_or_compile(id, "x + 1").unwrap();
        let env = [("x".to_string(), 10.0)].into_iter().collect();
        assert_eq!(compiled.eval(&env).unwrap(), 11.0);
        assert_eq!(cache.len(), 1);

        let compiled2 = cache.get_or_compile(id, "x + 2").unwrap();
        assert_eq!(compiled2.eval(&env).unwrap(), 12.0);
        assert_eq!(cache.len(), 1, "edited expression replaces the existing entry");
    }

    #[test]
    fn cache_hit_reuses_compiled_form() {
        let cache = ExpressionCache::new();
        let id = Uuid::new_v4();
        cache.get_or_compile(id, "x + 1").unwrap();
        cache.get_or_compile(id, "x + 1").unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evict_forces_recompile() {
        let cache = ExpressionCache::new();
        let id = Uuid::new_v4();
        cache.get_or_compile(id, "x + 1").unwrap();
        cache.evict(id);
        assert!(cache.is_empty());
    }
}
