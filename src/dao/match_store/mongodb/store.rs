use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database,
    bson::{Document as BsonDocument, doc},
    options::FullDocumentType,
};
use tokio::sync::RwLock;
use tracing::warn;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{doc_id, guarded_filter, to_bson_document, to_json_document},
};
use crate::dao::{
    match_store::{MatchStore, SnapshotStream, generate_id},
    models::{Document, FieldMap, WriteOutcome},
    storage::{StorageError, StorageResult},
};

/// Match store keeping one collection per namespace, keyed by `_id`.
#[derive(Clone)]
pub struct MongoMatchStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (_client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        *self.database.write().await = database;
        Ok(())
    }
}

impl MongoMatchStore {
    /// Connect and wait for the server to answer a ping.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        Ok(Self {
            inner: Arc::new(MongoInner {
                database: RwLock::new(database),
                config,
            }),
        })
    }

    async fn collection(&self, namespace: &str) -> Collection<BsonDocument> {
        self.inner
            .database
            .read()
            .await
            .collection::<BsonDocument>(namespace)
    }

    async fn set_fields(
        &self,
        namespace: &str,
        id: &str,
        filter: BsonDocument,
        fields: FieldMap,
        upsert: bool,
    ) -> MongoResult<u64> {
        let collection = self.collection(namespace).await;
        let update = doc! { "$set": to_bson_document(fields) };
        let result = collection
            .update_one(filter, update)
            .upsert(upsert)
            .await
            .map_err(|source| MongoDaoError::WriteFields {
                collection: namespace.to_owned(),
                id: id.to_owned(),
                source,
            })?;
        Ok(result.matched_count + u64::from(result.upserted_id.is_some()))
    }

    async fn read(&self, namespace: &str, id: &str) -> MongoResult<Option<Document>> {
        let collection = self.collection(namespace).await;
        let document = collection
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::ReadDocument {
                collection: namespace.to_owned(),
                id: id.to_owned(),
                source,
            })?;
        Ok(document.map(to_json_document))
    }

    async fn list_documents(&self, namespace: &str, filter: FieldMap) -> MongoResult<Vec<Document>> {
        let collection = self.collection(namespace).await;
        let list_error = |source| MongoDaoError::ListDocuments {
            collection: namespace.to_owned(),
            source,
        };

        let documents: Vec<BsonDocument> = collection
            .find(to_bson_document(filter))
            .await
            .map_err(list_error)?
            .try_collect()
            .await
            .map_err(list_error)?;

        Ok(documents.into_iter().map(to_json_document).collect())
    }

    /// Open a change stream on one document, then read its current value.
    ///
    /// Opening the stream first means a write landing between the two steps is
    /// delivered (possibly twice) rather than lost.
    async fn watch_document(&self, namespace: String, id: String) -> MongoResult<SnapshotStream> {
        let collection = self.collection(&namespace).await;
        let changes = collection
            .watch()
            .pipeline([doc! { "$match": { "documentKey._id": id.as_str() } }])
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|source| MongoDaoError::OpenChangeStream {
                collection: namespace.clone(),
                id: id.clone(),
                source,
            })?;

        let initial = self.read(&namespace, &id).await?;

        let mut changes = Box::pin(changes);
        let stream = async_stream::stream! {
            if let Some(document) = initial {
                yield Ok(document);
            }
            loop {
                match changes.next().await {
                    Some(Ok(event)) => {
                        if let Some(document) = event.full_document {
                            yield Ok(to_json_document(document));
                        }
                    }
                    Some(Err(err)) => {
                        warn!(collection = %namespace, id = %id, error = %err, "MongoDB change stream dropped");
                        yield Err(StorageError::disconnected(err.to_string()));
                        break;
                    }
                    None => {
                        yield Err(StorageError::disconnected(format!("change stream on `{namespace}/{id}` closed")));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

impl MatchStore for MongoMatchStore {
    fn create(&self, _namespace: &str) -> BoxFuture<'static, StorageResult<String>> {
        Box::pin(async move { Ok(generate_id()) })
    }

    fn write_fields(
        &self,
        namespace: &str,
        id: &str,
        fields: FieldMap,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let (namespace, id) = (namespace.to_owned(), id.to_owned());
        Box::pin(async move {
            if fields.is_empty() {
                return Ok(());
            }
            store
                .set_fields(&namespace, &id, doc_id(&id), fields, true)
                .await?;
            Ok(())
        })
    }

    fn write_fields_if(
        &self,
        namespace: &str,
        id: &str,
        expected: FieldMap,
        fields: FieldMap,
    ) -> BoxFuture<'static, StorageResult<WriteOutcome>> {
        let store = self.clone();
        let (namespace, id) = (namespace.to_owned(), id.to_owned());
        Box::pin(async move {
            let filter = guarded_filter(&id, expected);
            let matched = if fields.is_empty() {
                let found = store.collection(&namespace).await.find_one(filter).await;
                let found = found.map_err(|source| MongoDaoError::ReadDocument {
                    collection: namespace.clone(),
                    id: id.clone(),
                    source,
                })?;
                u64::from(found.is_some())
            } else {
                store.set_fields(&namespace, &id, filter, fields, false).await?
            };

            Ok(if matched == 0 {
                WriteOutcome::PreconditionFailed
            } else {
                WriteOutcome::Applied
            })
        })
    }

    fn read_once(
        &self,
        namespace: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let store = self.clone();
        let (namespace, id) = (namespace.to_owned(), id.to_owned());
        Box::pin(async move { store.read(&namespace, &id).await.map_err(Into::into) })
    }

    fn watch(&self, namespace: &str, id: &str) -> BoxFuture<'static, StorageResult<SnapshotStream>> {
        let store = self.clone();
        let (namespace, id) = (namespace.to_owned(), id.to_owned());
        Box::pin(async move { store.watch_document(namespace, id).await.map_err(Into::into) })
    }

    fn list(
        &self,
        namespace: &str,
        filter: FieldMap,
    ) -> BoxFuture<'static, StorageResult<Vec<Document>>> {
        let store = self.clone();
        let namespace = namespace.to_owned();
        Box::pin(async move { store.list_documents(&namespace, filter).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
