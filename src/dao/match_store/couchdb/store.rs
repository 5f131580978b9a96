use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dao::{
    match_store::{MatchStore, SnapshotStream, generate_id},
    models::{
        Document, FieldMap, WriteOutcome, merge_fields, preconditions_hold, strip_metadata,
    },
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, ChangesResponse, DocIdsFilter, END_SUFFIX, doc_id, namespace_prefix,
        seq_param,
    },
};

const ALL_DOCS: &str = "_all_docs";
const CHANGES: &str = "_changes";

/// [`MatchStore`] backed by a CouchDB database.
#[derive(Clone)]
pub struct CouchMatchStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    longpoll_timeout_ms: u64,
    conflict_retries: u32,
}

impl CouchMatchStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            longpoll_timeout_ms: config.longpoll_timeout_ms,
            conflict_retries: config.conflict_retries.max(1),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorized(self.client.request(method, url))
    }

    fn database_request(&self, method: Method) -> (String, reqwest::RequestBuilder) {
        let url = format!("{}/{}", self.base_url, self.database);
        let builder = self.authorized(self.client.request(method, &url));
        (url, builder)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let (_, builder) = self.database_request(Method::GET);

        let response = builder
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let (_, builder) = self.database_request(Method::PUT);
                let create =
                    builder
                        .send()
                        .await
                        .map_err(|source| CouchDaoError::DatabaseCreate {
                            database: database.clone(),
                            source,
                        })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document(&self, doc_id: &str) -> CouchResult<Option<Document>> {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<Document>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document(&self, doc_id: &str, document: &Document) -> CouchResult<()> {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: response.status(),
            })
        }
    }

    /// Read-modify-write guarded by the document `_rev`; retried on revision conflicts.
    ///
    /// With `expected` set the write is conditional and never creates the document.
    async fn update_document(
        &self,
        doc_id: &str,
        expected: Option<&FieldMap>,
        fields: FieldMap,
    ) -> CouchResult<WriteOutcome> {
        for attempt in 1..=self.conflict_retries {
            let mut body = match (self.get_document(doc_id).await?, expected) {
                (Some(existing), _) => existing,
                (None, None) => Document::new(),
                (None, Some(_)) => return Ok(WriteOutcome::PreconditionFailed),
            };

            if let Some(expected) = expected
                && !preconditions_hold(&body, expected)
            {
                return Ok(WriteOutcome::PreconditionFailed);
            }

            merge_fields(&mut body, fields.clone());
            match self.put_document(doc_id, &body).await {
                Ok(()) => return Ok(WriteOutcome::Applied),
                Err(CouchDaoError::RequestStatus { status, .. })
                    if status == StatusCode::CONFLICT =>
                {
                    debug!(doc_id, attempt, "CouchDB revision conflict; re-reading document");
                }
                Err(err) => return Err(err),
            }
        }

        Err(CouchDaoError::ConflictRetriesExhausted {
            path: doc_id.to_string(),
            attempts: self.conflict_retries,
        })
    }

    async fn list_documents(&self, prefix: &str) -> CouchResult<Vec<Document>> {
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        Ok(payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(strip_metadata)
            .collect())
    }

    /// Query the `_changes` feed for a single document.
    ///
    /// `feed` is `normal` for the catch-up request and `longpoll` afterwards.
    async fn changes(&self, doc_id: &str, since: &Value, feed: &str) -> CouchResult<ChangesResponse> {
        let query = [
            ("filter", "_doc_ids".to_string()),
            ("include_docs", "true".to_string()),
            ("feed", feed.to_string()),
            ("since", seq_param(since)),
            ("timeout", self.longpoll_timeout_ms.to_string()),
        ];

        let response = self
            .request(Method::POST, CHANGES)
            .query(&query)
            .json(&DocIdsFilter {
                doc_ids: vec![doc_id.to_string()],
            })
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<ChangesResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: CHANGES.to_string(),
                source,
            })
    }

    /// Follow one document through the changes feed.
    ///
    /// The catch-up request from sequence `0` yields the latest revision (CouchDB
    /// collapses a document's history), so the first item is the current value.
    fn watch_document(&self, doc_id: String) -> SnapshotStream {
        let store = self.clone();
        Box::pin(async_stream::stream! {
            let mut since = Value::String("0".to_string());
            let mut feed = "normal";
            loop {
                match store.changes(&doc_id, &since, feed).await {
                    Ok(response) => {
                        for change in response.results {
                            if change.deleted {
                                continue;
                            }
                            if let Some(document) = change.doc {
                                yield Ok(strip_metadata(document));
                            }
                        }
                        since = response.last_seq;
                        feed = "longpoll";
                    }
                    Err(err) => {
                        warn!(doc_id = %doc_id, error = %err, "CouchDB changes feed dropped");
                        yield Err(StorageError::disconnected(err.to_string()));
                        break;
                    }
                }
            }
        })
    }
}

impl MatchStore for CouchMatchStore {
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
        let doc_id = doc_id(namespace, id);
        Box::pin(async move {
            store
                .update_document(&doc_id, None, fields)
                .await
                .map(|_| ())
                .map_err(Into::into)
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
        let doc_id = doc_id(namespace, id);
        Box::pin(async move {
            store
                .update_document(&doc_id, Some(&expected), fields)
                .await
                .map_err(Into::into)
        })
    }

    fn read_once(
        &self,
        namespace: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let store = self.clone();
        let doc_id = doc_id(namespace, id);
        Box::pin(async move {
            let maybe_doc = store.get_document(&doc_id).await?;
            Ok(maybe_doc.map(strip_metadata))
        })
    }

    fn watch(&self, namespace: &str, id: &str) -> BoxFuture<'static, StorageResult<SnapshotStream>> {
        let stream = self.watch_document(doc_id(namespace, id));
        Box::pin(async move { Ok(stream) })
    }

    fn list(
        &self,
        namespace: &str,
        filter: FieldMap,
    ) -> BoxFuture<'static, StorageResult<Vec<Document>>> {
        let store = self.clone();
        let prefix = namespace_prefix(namespace);
        Box::pin(async move {
            let docs = store.list_documents(&prefix).await?;
            Ok(docs
                .into_iter()
                .filter(|doc| preconditions_hold(doc, &filter))
                .collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let (url, builder) = store.database_request(Method::GET);

            let response = builder
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
