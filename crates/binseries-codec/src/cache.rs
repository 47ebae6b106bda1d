//! # Compiled-Procedure Cache
//!
//! Compiled block procedures are memoized by structural tree identity.
//! Every serializer whose tree is equal to an already compiled one gets the
//! same [`CompiledBlock`] instance.
//!
//! ## Concurrency
//! The map entry is a shared `OnceCell`. The first caller compiles while
//! concurrent callers for the same tree block on the cell, so each distinct
//! tree is compiled once. The map shard lock is released before compiling.
//! A failed compilation leaves the cell empty and the next caller retries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};

use binseries_core::Result;

use crate::compiler::{compile, CompiledBlock};
use crate::tree::FieldTree;

static GLOBAL: Lazy<BlockCache> = Lazy::new(BlockCache::new);

#[derive(Debug, Default)]
pub struct BlockCache {
    entries: DashMap<Arc<FieldTree>, Arc<OnceCell<Arc<CompiledBlock>>>>,
    compilations: AtomicUsize,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache used by serializers unless told otherwise.
    pub fn global() -> &'static BlockCache {
        &GLOBAL
    }

    pub fn get_or_compile(&self, tree: Arc<FieldTree>) -> Result<Arc<CompiledBlock>> {
        let (key, cell) = {
            let entry = self
                .entries
                .entry(tree)
                .or_insert_with(|| Arc::new(OnceCell::new()));
            (Arc::clone(entry.key()), Arc::clone(entry.value()))
        };

        let block = cell.get_or_try_init(|| {
            self.compilations.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "BlockCache: compiling {} ({} scalars, max {} bytes per record)",
                key.root().value_type(),
                key.layout().len(),
                key.max_record_size()
            );
            compile(Arc::clone(&key)).map(Arc::new)
        })?;
        Ok(Arc::clone(block))
    }

    /// Number of compilations actually executed.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Number of distinct trees seen.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
