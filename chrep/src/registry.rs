use std::collections::HashMap;

use chrep_config::shared::TableConfig;
use tracing::{debug, info};

use crate::error::{ErrorKind, ReplError, ReplResult};
use crate::repl_error;
use crate::replication::client::PgReplicationClient;
use crate::types::{ColumnSchema, RelationId, ReplicaIdentity};

/// Everything the pipeline knows about one configured source table.
#[derive(Debug, Clone)]
pub struct RelationInfo {
    pub relation_id: RelationId,
    /// Schema (namespace) the table lives in.
    pub schema: String,
    /// Bare relation name; also the configuration key.
    pub name: String,
    /// Full column schemas in attribute order, as emitted on the wire.
    pub column_schemas: Vec<ColumnSchema>,
}

/// Maps source relation OIDs to configured tables.
///
/// Populated once at bootstrap from the source catalogs filtered by the
/// configured publication, and read-only during streaming. Relations that are
/// published but not configured are not registered; messages for them are
/// silently discarded by contract.
#[derive(Debug, Default)]
pub struct RelationRegistry {
    relations: HashMap<RelationId, RelationInfo>,
    by_name: HashMap<String, RelationId>,
}

impl RelationRegistry {
    /// Loads the registry from the source catalogs.
    ///
    /// Fails with [`ErrorKind::ReplicaIdentityNotFull`] if any configured
    /// table does not have `FULL` replica identity, since collapsing and
    /// replacing engines need the complete pre-image of updated and deleted
    /// rows. Loading is idempotent: the returned registry is complete on its
    /// own.
    pub async fn load(
        client: &PgReplicationClient,
        publication_name: &str,
        configured_tables: impl Iterator<Item = (&str, &TableConfig)>,
    ) -> ReplResult<Self> {
        let configured: HashMap<&str, &TableConfig> = configured_tables.collect();

        let mut registry = RelationRegistry::default();
        let publication_tables = client.get_publication_tables(publication_name).await?;

        for table in publication_tables {
            if !configured.contains_key(table.name.as_str()) {
                debug!(table = %table.name, "publication table not configured, skipping");
                continue;
            }

            if table.replica_identity != ReplicaIdentity::Full {
                return Err(repl_error!(
                    ErrorKind::ReplicaIdentityNotFull,
                    "table must have FULL replica identity",
                    format!(
                        "table {} has replica identity {}",
                        table.name, table.replica_identity
                    )
                ));
            }

            let column_schemas = client.get_column_schemas(table.relation_id).await?;

            registry.insert(RelationInfo {
                relation_id: table.relation_id,
                schema: table.schema,
                name: table.name,
                column_schemas,
            });
        }

        info!(
            publication = publication_name,
            tables = registry.len(),
            "loaded relation registry"
        );

        Ok(registry)
    }

    /// Registers a relation, replacing any previous entry for the same OID.
    pub fn insert(&mut self, info: RelationInfo) {
        self.by_name.insert(info.name.clone(), info.relation_id);
        self.relations.insert(info.relation_id, info);
    }

    /// Constant-time lookup by relation OID. Absence is not an error.
    pub fn resolve(&self, relation_id: RelationId) -> Option<&RelationInfo> {
        self.relations.get(&relation_id)
    }

    /// Lookup by configured table name.
    pub fn get_by_name(&self, name: &str) -> Option<&RelationInfo> {
        self.by_name.get(name).and_then(|id| self.relations.get(id))
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_postgres::types::Type;

    fn info(id: u32, name: &str) -> RelationInfo {
        RelationInfo {
            relation_id: RelationId::new(id),
            schema: "public".to_string(),
            name: name.to_string(),
            column_schemas: vec![ColumnSchema {
                name: "id".to_string(),
                typ: Type::INT4,
                nullable: false,
                primary: true,
            }],
        }
    }

    #[test]
    fn resolves_registered_relations() {
        let mut registry = RelationRegistry::default();
        registry.insert(info(16384, "orders"));

        assert_eq!(
            registry.resolve(RelationId::new(16384)).unwrap().name,
            "orders"
        );
        assert_eq!(
            registry.get_by_name("orders").unwrap().relation_id,
            RelationId::new(16384)
        );
    }

    #[test]
    fn unknown_relation_is_absent_not_an_error() {
        let registry = RelationRegistry::default();
        assert!(registry.resolve(RelationId::new(9999)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn reinsert_replaces_previous_entry() {
        let mut registry = RelationRegistry::default();
        registry.insert(info(16384, "orders"));
        registry.insert(info(16384, "orders"));

        assert_eq!(registry.len(), 1);
    }
}
