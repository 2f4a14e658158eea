/// Registry of decoded logical-table descriptors
///
/// A `MetadataCache` specialization keyed by the root relation id. Misses
/// decode a descriptor from the catalog record; mutations write through to
/// the catalog and evict the cached entry, so the next fetch sees the new
/// descriptor under the same identifier.
use crate::cache::{MetadataCache, PinTracker};
use crate::catalog::Catalog;
use crate::error::Result;
use crate::types::{ColumnType, LogicalTable, RelationId};
use parking_lot::RwLock;
use std::sync::Arc;

/// The registry's cache type. Callers pin it, fetch entries, and release.
pub type DescriptorCache = MetadataCache<RelationId, LogicalTable>;

pub struct LogicalTableRegistry {
    catalog: Arc<Catalog>,
    /// Swapped wholesale when the extension metadata is invalidated; pinned
    /// holders keep the old generation alive until their release.
    cache: RwLock<Arc<DescriptorCache>>,
}

impl LogicalTableRegistry {
    pub fn new(catalog: Arc<Catalog>) -> Result<Arc<Self>> {
        let cache = Self::build_cache(&catalog)?;
        Ok(Arc::new(Self {
            catalog,
            cache: RwLock::new(cache),
        }))
    }

    fn build_cache(catalog: &Arc<Catalog>) -> Result<Arc<DescriptorCache>> {
        let source = Arc::clone(catalog);
        let cache = Arc::new(
            MetadataCache::new("logical_table_registry").with_create_entry(Box::new(
                move |relation: &RelationId| Ok(source.record(*relation).map(Arc::new)),
            )),
        );
        cache.init()?;
        // Descriptor pins legitimately straddle the reorganizer's
        // transaction hops; the abort sweep still reclaims them.
        cache.set_release_on_commit(false);
        Ok(cache)
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Pin the current cache generation. Pair with `release` on the
    /// returned cache.
    pub fn pin(&self, tracker: &PinTracker) -> Arc<DescriptorCache> {
        self.cache.read().pin(tracker)
    }

    /// Descriptor for `relation`, or None when it is not a logical table.
    /// The caller must hold a pin on the returned generation.
    pub fn get(
        &self,
        cache: &DescriptorCache,
        relation: RelationId,
    ) -> Result<Option<Arc<LogicalTable>>> {
        cache.fetch(&relation)
    }

    /// Move a logical table to a new schema.
    pub fn set_schema(&self, relation: RelationId, new_schema: &str) -> Result<bool> {
        let changed = self.catalog.set_schema(relation, new_schema)?;
        if changed {
            self.evict(relation)?;
        }
        Ok(changed)
    }

    /// Rename a logical table; its relation id and catalog id are stable.
    pub fn set_table_name(&self, relation: RelationId, new_name: &str) -> Result<bool> {
        let changed = self.catalog.set_table_name(relation, new_name)?;
        if changed {
            self.evict(relation)?;
        }
        Ok(changed)
    }

    /// Rename a dimension column. No-op (false) when the column does not
    /// back a dimension.
    pub fn rename_dimension(
        &self,
        relation: RelationId,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool> {
        let changed = self.catalog.rename_dimension(relation, old_name, new_name)?;
        if changed {
            self.evict(relation)?;
        }
        Ok(changed)
    }

    /// Record a new column type for a dimension.
    pub fn retype_dimension(
        &self,
        relation: RelationId,
        column: &str,
        new_type: ColumnType,
    ) -> Result<bool> {
        let changed = self.catalog.retype_dimension(relation, column, new_type)?;
        if changed {
            self.evict(relation)?;
        }
        Ok(changed)
    }

    /// The extension metadata went away or reappeared: retire the current
    /// cache generation and start a fresh one. Outstanding pins keep the
    /// retired generation alive until released.
    pub fn handle_invalidation(&self) -> Result<()> {
        let fresh = Self::build_cache(&self.catalog)?;
        let old = {
            let mut guard = self.cache.write();
            std::mem::replace(&mut *guard, fresh)
        };
        old.invalidate();
        Ok(())
    }

    fn evict(&self, relation: RelationId) -> Result<()> {
        self.cache.read().remove(&relation)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dimension;

    fn registry() -> (Arc<Catalog>, Arc<LogicalTableRegistry>) {
        let catalog = Arc::new(Catalog::in_memory());
        catalog
            .create_logical_table(
                "public",
                "metrics",
                RelationId(10),
                vec![Dimension::range("ts", ColumnType::Timestamp, 1_000_000)],
            )
            .unwrap();
        let registry = LogicalTableRegistry::new(Arc::clone(&catalog)).unwrap();
        (catalog, registry)
    }

    #[test]
    fn test_fetch_decodes_descriptor() {
        let (_, registry) = registry();
        let tracker = PinTracker::new();
        let cache = registry.pin(&tracker);

        let table = registry.get(&cache, RelationId(10)).unwrap().unwrap();
        assert_eq!(table.table_name, "metrics");
        assert!(registry.get(&cache, RelationId(99)).unwrap().is_none());

        cache.release(&tracker).unwrap();
    }

    #[test]
    fn test_dimension_rename_visible_to_next_fetch() {
        let (_, registry) = registry();
        let tracker = PinTracker::new();
        let cache = registry.pin(&tracker);

        let before = registry.get(&cache, RelationId(10)).unwrap().unwrap();
        assert_eq!(before.dimensions[0].column_name, "ts");

        assert!(registry
            .rename_dimension(RelationId(10), "ts", "recorded_at")
            .unwrap());

        let after = registry.get(&cache, RelationId(10)).unwrap().unwrap();
        assert_eq!(after.dimensions[0].column_name, "recorded_at");
        // identity survives the rename
        assert_eq!(after.id, before.id);
        assert_eq!(after.root_relation, before.root_relation);

        cache.release(&tracker).unwrap();
    }

    #[test]
    fn test_rename_of_non_dimension_column_is_noop() {
        let (_, registry) = registry();
        assert!(!registry
            .rename_dimension(RelationId(10), "payload", "body")
            .unwrap());
    }

    #[test]
    fn test_invalidation_swaps_generation_under_pin() {
        let (_, registry) = registry();
        let tracker = PinTracker::new();
        let old = registry.pin(&tracker);
        registry.get(&old, RelationId(10)).unwrap().unwrap();

        registry.handle_invalidation().unwrap();

        // the retired generation is still usable while pinned
        assert!(old.is_initialized());
        assert!(registry.get(&old, RelationId(10)).unwrap().is_some());
        old.release(&tracker).unwrap();
        assert!(!old.is_initialized());

        // and the fresh generation serves fetches again
        let fresh = registry.pin(&tracker);
        assert!(registry.get(&fresh, RelationId(10)).unwrap().is_some());
        fresh.release(&tracker).unwrap();
    }
}
