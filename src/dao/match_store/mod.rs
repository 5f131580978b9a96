#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::{fmt, str::FromStr, sync::Arc};

use futures::{future::BoxFuture, stream::BoxStream};

use crate::dao::{
    models::{Document, FieldMap, WriteOutcome},
    storage::StorageResult,
};

/// Stream of full-document snapshots delivered by [`MatchStore::watch`].
///
/// A dropped subscription surfaces as a [`StorageError::Disconnected`](crate::dao::storage::StorageError)
/// item, after which the stream ends.
pub type SnapshotStream = BoxStream<'static, StorageResult<Document>>;

/// Shared, field-addressable document store the match subsystem synchronises through.
///
/// Writes are last-write-wins per field. Every backend also offers a guarded
/// write (`write_fields_if`) so concurrent writers can converge without
/// cross-field transactions.
pub trait MatchStore: Send + Sync {
    /// Allocate a globally unique document id under `namespace` without writing anything.
    fn create(&self, namespace: &str) -> BoxFuture<'static, StorageResult<String>>;
    /// Atomically set `fields` on the document, creating it when absent.
    fn write_fields(
        &self,
        namespace: &str,
        id: &str,
        fields: FieldMap,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Atomically set `fields` only if every `expected` field still holds. Never creates.
    fn write_fields_if(
        &self,
        namespace: &str,
        id: &str,
        expected: FieldMap,
        fields: FieldMap,
    ) -> BoxFuture<'static, StorageResult<WriteOutcome>>;
    /// Read the current document once.
    fn read_once(&self, namespace: &str, id: &str)
    -> BoxFuture<'static, StorageResult<Option<Document>>>;
    /// Subscribe to the document: the current value first, then one snapshot per write.
    fn watch(&self, namespace: &str, id: &str) -> BoxFuture<'static, StorageResult<SnapshotStream>>;
    /// Snapshot every document of `namespace` whose fields equal `filter`.
    fn list(
        &self,
        namespace: &str,
        filter: FieldMap,
    ) -> BoxFuture<'static, StorageResult<Vec<Document>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Allocate a fresh document identifier; also used as the user-facing join code.
pub(crate) fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Backend selected with the `MATCH_STORE` environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    #[cfg(feature = "couch-store")]
    Couch,
    #[cfg(feature = "mongo-store")]
    Mongo,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            #[cfg(feature = "couch-store")]
            "couch" | "couchdb" => Ok(StoreBackend::Couch),
            #[cfg(feature = "mongo-store")]
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            other => Err(format!("unsupported match store backend `{other}`")),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreBackend::Memory => "memory",
            #[cfg(feature = "couch-store")]
            StoreBackend::Couch => "couch",
            #[cfg(feature = "mongo-store")]
            StoreBackend::Mongo => "mongo",
        })
    }
}

/// Connect a networked backend from its environment configuration.
///
/// The memory backend has nothing to connect to; callers create it once and
/// hand the same instance out on every reconnect.
pub async fn connect(
    backend: StoreBackend,
    memory: &memory::MemoryMatchStore,
) -> StorageResult<Arc<dyn MatchStore>> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(memory.clone())),
        #[cfg(feature = "couch-store")]
        StoreBackend::Couch => {
            let config = self::couchdb::CouchConfig::from_env()?;
            Ok(Arc::new(self::couchdb::CouchMatchStore::connect(config).await?))
        }
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => {
            let config = self::mongodb::MongoConfig::from_env().await?;
            Ok(Arc::new(self::mongodb::MongoMatchStore::connect(config).await?))
        }
    }
}
