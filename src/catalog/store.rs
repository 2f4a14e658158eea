/// Durable catalog of logical tables and their partitions
use crate::error::{MetaError, Result};
use crate::host::PartitionEnumerator;
use crate::types::{
    ColumnType, Dimension, LogicalTable, LogicalTableId, PartitionRef, RelationId,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Catalog metadata (persisted to disk)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogData {
    /// Root relation id -> logical table record
    tables: HashMap<RelationId, LogicalTable>,
    /// Partition relation id -> partition record
    partitions: HashMap<RelationId, PartitionRef>,
    next_table_id: u32,
    next_partition_id: u32,
}

/// Catalog of logical tables.
///
/// The registry's cache decodes descriptors out of these records; the
/// dispatcher's rename/retype paths write through here. When opened with a
/// data directory the records are persisted as a bincode payload with a
/// trailing crc32 footer and rewritten on every mutation.
pub struct Catalog {
    data: RwLock<CatalogData>,
    persist_path: Option<PathBuf>,
}

impl Catalog {
    /// Open a catalog backed by `data_dir/catalog.bin`, loading any
    /// existing records.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let persist_path = data_dir.as_ref().join("catalog.bin");

        if let Some(parent) = persist_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if persist_path.exists() {
            let bytes = fs::read(&persist_path)?;
            Self::decode(&bytes)?
        } else {
            CatalogData::default()
        };

        Ok(Self {
            data: RwLock::new(data),
            persist_path: Some(persist_path),
        })
    }

    /// Catalog that lives only in memory. Used by embedded hosts and tests.
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(CatalogData::default()),
            persist_path: None,
        }
    }

    /// Register a new logical table rooted at `root_relation`.
    pub fn create_logical_table(
        &self,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        root_relation: RelationId,
        dimensions: Vec<Dimension>,
    ) -> Result<LogicalTable> {
        let mut data = self.data.write();

        if data.tables.contains_key(&root_relation) {
            return Err(MetaError::InvalidArgument(format!(
                "relation {root_relation} is already a logical table"
            )));
        }
        if dimensions.is_empty() {
            return Err(MetaError::InvalidArgument(
                "a logical table needs at least one partitioning dimension".into(),
            ));
        }

        data.next_table_id += 1;
        let table = LogicalTable {
            id: LogicalTableId(data.next_table_id),
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            root_relation,
            dimensions,
        };
        data.tables.insert(root_relation, table.clone());

        drop(data);
        self.persist()?;
        Ok(table)
    }

    /// Remove a logical table record and every partition record under it.
    pub fn drop_logical_table(&self, root_relation: RelationId) -> Result<LogicalTable> {
        let mut data = self.data.write();
        let table = data.tables.remove(&root_relation).ok_or_else(|| {
            MetaError::TableNotFound(format!("no logical table rooted at {root_relation}"))
        })?;
        data.partitions.retain(|_, p| p.table_id != table.id);

        drop(data);
        self.persist()?;
        Ok(table)
    }

    /// Attach a partition to an existing logical table.
    pub fn add_partition(
        &self,
        table_id: LogicalTableId,
        relation: RelationId,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Result<PartitionRef> {
        let mut data = self.data.write();
        if !data.tables.values().any(|t| t.id == table_id) {
            return Err(MetaError::TableNotFound(format!(
                "no logical table with id {table_id}"
            )));
        }
        if data.partitions.contains_key(&relation) {
            return Err(MetaError::InvalidArgument(format!(
                "relation {relation} is already a partition"
            )));
        }

        data.next_partition_id += 1;
        let partition = PartitionRef {
            id: data.next_partition_id,
            table_id,
            relation,
            schema_name: schema_name.into(),
            table_name: table_name.into(),
        };
        data.partitions.insert(relation, partition.clone());

        drop(data);
        self.persist()?;
        Ok(partition)
    }

    /// Drop the record of a partition that is being removed directly (its
    /// physical drop is the host's business).
    pub fn remove_partition(&self, relation: RelationId) -> Result<bool> {
        let removed = self.data.write().partitions.remove(&relation).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Logical-table record rooted at `relation`, if any.
    pub fn record(&self, relation: RelationId) -> Option<LogicalTable> {
        self.data.read().tables.get(&relation).cloned()
    }

    pub fn is_partition(&self, relation: RelationId) -> bool {
        self.data.read().partitions.contains_key(&relation)
    }

    pub fn partition_by_relation(&self, relation: RelationId) -> Option<PartitionRef> {
        self.data.read().partitions.get(&relation).cloned()
    }

    /// Partitions of a logical table, in creation order.
    pub fn partitions_of_table(&self, table_id: LogicalTableId) -> Vec<PartitionRef> {
        let mut partitions: Vec<PartitionRef> = self
            .data
            .read()
            .partitions
            .values()
            .filter(|p| p.table_id == table_id)
            .cloned()
            .collect();
        partitions.sort_by_key(|p| p.id);
        partitions
    }

    /// Move a logical table to a new schema.
    pub fn set_schema(&self, root_relation: RelationId, new_schema: &str) -> Result<bool> {
        self.update_table(root_relation, |t| {
            t.schema_name = new_schema.to_string();
            true
        })
    }

    /// Rename a logical table. The root relation id is stable.
    pub fn set_table_name(&self, root_relation: RelationId, new_name: &str) -> Result<bool> {
        self.update_table(root_relation, |t| {
            t.table_name = new_name.to_string();
            true
        })
    }

    /// Rename the column backing a dimension. Returns false when no
    /// dimension uses `old_name`.
    pub fn rename_dimension(
        &self,
        root_relation: RelationId,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool> {
        self.update_table(root_relation, |t| {
            match t.dimensions.iter_mut().find(|d| d.column_name == old_name) {
                Some(dim) => {
                    dim.column_name = new_name.to_string();
                    true
                }
                None => false,
            }
        })
    }

    /// Change the column type recorded for a dimension.
    pub fn retype_dimension(
        &self,
        root_relation: RelationId,
        column: &str,
        new_type: ColumnType,
    ) -> Result<bool> {
        self.update_table(root_relation, |t| {
            match t.dimensions.iter_mut().find(|d| d.column_name == column) {
                Some(dim) => {
                    dim.column_type = new_type;
                    true
                }
                None => false,
            }
        })
    }

    fn update_table<F>(&self, root_relation: RelationId, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut LogicalTable) -> bool,
    {
        let changed = {
            let mut data = self.data.write();
            match data.tables.get_mut(&root_relation) {
                Some(table) => apply(table),
                None => {
                    return Err(MetaError::TableNotFound(format!(
                        "no logical table rooted at {root_relation}"
                    )))
                }
            }
        };
        if changed {
            self.persist()?;
        }
        Ok(changed)
    }

    fn decode(bytes: &[u8]) -> Result<CatalogData> {
        if bytes.len() < 4 {
            return Err(MetaError::Corruption("catalog file truncated".into()));
        }
        let (payload, footer) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let computed = crc32fast::hash(payload);
        if stored != computed {
            return Err(MetaError::Corruption(format!(
                "catalog checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }
        Ok(bincode::deserialize(payload)?)
    }

    fn persist(&self) -> Result<()> {
        let path = match &self.persist_path {
            Some(path) => path,
            None => return Ok(()),
        };
        let data = self.data.read();
        let mut bytes = bincode::serialize(&*data)?;
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        fs::write(path, bytes)?;
        Ok(())
    }
}

impl PartitionEnumerator for Catalog {
    fn partitions_of(&self, table: &LogicalTable) -> Result<Vec<PartitionRef>> {
        Ok(self.partitions_of_table(table.id))
    }
}
