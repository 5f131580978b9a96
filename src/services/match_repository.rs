//! Typed operations on match records, on top of any [`MatchStore`].

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    dao::{
        match_store::MatchStore,
        models::{Document, FieldMap, MATCH_NAMESPACE, WriteOutcome},
    },
    error::ServiceError,
    state::{
        match_record::{AnswerLetter, MatchRecord, MatchState, Side, fields},
        questions::QuestionDeck,
        resolution::Resolution,
        state_machine::{MatchEvent, next_state},
    },
};

/// Decoded snapshots of one match. Quarantined snapshots surface as
/// [`ServiceError::Corrupted`] items, a dropped subscription as
/// [`ServiceError::Disconnected`] followed by the end of the stream.
pub type RecordStream = BoxStream<'static, Result<MatchRecord, ServiceError>>;

/// Match-level reads and guarded writes over a [`MatchStore`].
#[derive(Clone)]
pub struct MatchRepository {
    store: Arc<dyn MatchStore>,
}

fn decode(match_id: &str, document: Document) -> Result<MatchRecord, ServiceError> {
    MatchRecord::from_document(document).map_err(|source| ServiceError::Corrupted {
        match_id: match_id.to_string(),
        source,
    })
}

fn field(name: &str, value: Value) -> (String, Value) {
    (name.to_string(), value)
}

impl MatchRepository {
    pub fn new(store: Arc<dyn MatchStore>) -> Self {
        Self { store }
    }

    /// Open a new match for `host_id` and write its initial record in one write.
    pub async fn create_match(
        &self,
        host_id: &str,
        deck: QuestionDeck,
    ) -> Result<MatchRecord, ServiceError> {
        let match_id = self.store.create(MATCH_NAMESPACE).await?;
        let record = MatchRecord::waiting(match_id.clone(), host_id.to_string(), deck);
        let document = record
            .to_document()
            .map_err(|source| ServiceError::Corrupted {
                match_id: match_id.clone(),
                source,
            })?;

        self.store
            .write_fields(MATCH_NAMESPACE, &match_id, document)
            .await?;
        debug!(match_id = %match_id, host_id, "match created");
        Ok(record)
    }

    /// Read and decode a match once.
    pub async fn find(&self, match_id: &str) -> Result<Option<MatchRecord>, ServiceError> {
        self.store
            .read_once(MATCH_NAMESPACE, match_id)
            .await?
            .map(|document| decode(match_id, document))
            .transpose()
    }

    /// Like [`MatchRepository::find`] but a missing match is [`ServiceError::MatchNotFound`].
    pub async fn get(&self, match_id: &str) -> Result<MatchRecord, ServiceError> {
        self.find(match_id)
            .await?
            .ok_or_else(|| ServiceError::MatchNotFound(match_id.to_string()))
    }

    /// Take the joiner seat of a waiting match.
    ///
    /// One guarded write sets the joiner and starts the match, so no snapshot
    /// ever shows a joiner on a waiting match. Rejoining is idempotent.
    pub async fn join_match(
        &self,
        match_id: &str,
        joiner_id: &str,
    ) -> Result<MatchRecord, ServiceError> {
        let record = self.get(match_id).await?;
        if let Some(joined) = Self::check_joinable(&record, joiner_id)? {
            return Ok(joined);
        }
        let state = next_state(record.state, MatchEvent::Joined)?;

        let expected = FieldMap::from_iter([
            field(fields::STATE, MatchState::Waiting.as_value()),
            field(fields::JOINER_ID, Value::Null),
        ]);
        let update = FieldMap::from_iter([
            field(fields::JOINER_ID, json!(joiner_id)),
            field(fields::STATE, state.as_value()),
        ]);

        match self
            .store
            .write_fields_if(MATCH_NAMESPACE, match_id, expected, update)
            .await?
        {
            WriteOutcome::Applied => {
                debug!(match_id, joiner_id, "match joined");
                let mut joined = record;
                joined.joiner_id = Some(joiner_id.to_string());
                joined.state = state;
                Ok(joined)
            }
            WriteOutcome::PreconditionFailed => {
                // Someone else got there first; report what the record says now.
                let current = self.get(match_id).await?;
                match Self::check_joinable(&current, joiner_id)? {
                    Some(joined) => Ok(joined),
                    None => Err(ServiceError::WriteConflict),
                }
            }
        }
    }

    /// `Some(record)` when `joiner_id` already holds the seat, `None` when the
    /// seat is free, an error when the match cannot be joined.
    fn check_joinable(
        record: &MatchRecord,
        joiner_id: &str,
    ) -> Result<Option<MatchRecord>, ServiceError> {
        if record.host_id == joiner_id {
            return Err(ServiceError::InvalidInput(
                "cannot join a match you are hosting".into(),
            ));
        }
        match record.joiner_id.as_deref() {
            Some(current) if current == joiner_id => Ok(Some(record.clone())),
            Some(_) => Err(ServiceError::MatchFull(record.match_id.clone())),
            None if record.state == MatchState::Waiting => Ok(None),
            None => Err(ServiceError::InvalidState(format!(
                "match `{}` is no longer open",
                record.match_id
            ))),
        }
    }

    /// Waiting matches, newest first. Malformed records are skipped.
    pub async fn list_open_matches(&self) -> Result<Vec<MatchRecord>, ServiceError> {
        let filter = FieldMap::from_iter([field(fields::STATE, MatchState::Waiting.as_value())]);
        let documents = self.store.list(MATCH_NAMESPACE, filter).await?;

        let mut open: Vec<MatchRecord> = documents
            .into_iter()
            .filter_map(|document| match MatchRecord::from_document(document) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(error = %err, "skipping malformed match in lobby listing");
                    None
                }
            })
            .filter(|record| record.state == MatchState::Waiting)
            .collect();
        open.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(open)
    }

    /// Record `side`'s answer to question `question_index`.
    ///
    /// Only the side's own answer field is written, and only while that
    /// question is current and unanswered; otherwise [`ServiceError::WriteConflict`].
    pub async fn submit_answer(
        &self,
        match_id: &str,
        question_index: u32,
        side: Side,
        letter: AnswerLetter,
    ) -> Result<(), ServiceError> {
        let expected = FieldMap::from_iter([
            field(fields::STATE, MatchState::InProgress.as_value()),
            field(fields::CURRENT_QUESTION_INDEX, json!(question_index)),
            field(side.answer_field(), Value::Null),
        ]);
        let update = FieldMap::from_iter([field(side.answer_field(), json!(letter.to_string()))]);
        self.write_guarded(match_id, expected, update).await
    }

    /// Write the resolution of a question: lives, cleared answers and either
    /// the next question or the final result, as one write.
    pub async fn advance_or_finish(
        &self,
        match_id: &str,
        resolution: &Resolution,
    ) -> Result<(), ServiceError> {
        self.write_guarded(match_id, resolution.preconditions(), resolution.fields())
            .await
    }

    /// Publish the advisory countdown of question `question_index`.
    pub async fn publish_time_left(
        &self,
        match_id: &str,
        question_index: u32,
        seconds: u8,
    ) -> Result<(), ServiceError> {
        let expected = FieldMap::from_iter([
            field(fields::STATE, MatchState::InProgress.as_value()),
            field(fields::CURRENT_QUESTION_INDEX, json!(question_index)),
        ]);
        let update = FieldMap::from_iter([field(fields::TIME_LEFT, json!(seconds))]);
        self.write_guarded(match_id, expected, update).await
    }

    /// Subscribe to decoded snapshots of a match.
    pub async fn watch(&self, match_id: &str) -> Result<RecordStream, ServiceError> {
        let snapshots = self.store.watch(MATCH_NAMESPACE, match_id).await?;
        let match_id = match_id.to_string();
        Ok(snapshots
            .map(move |item| match item {
                Ok(document) => decode(&match_id, document),
                Err(err) => Err(err.into()),
            })
            .boxed())
    }

    async fn write_guarded(
        &self,
        match_id: &str,
        expected: FieldMap,
        update: FieldMap,
    ) -> Result<(), ServiceError> {
        match self
            .store
            .write_fields_if(MATCH_NAMESPACE, match_id, expected, update)
            .await?
        {
            WriteOutcome::Applied => Ok(()),
            WriteOutcome::PreconditionFailed => Err(ServiceError::WriteConflict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::match_store::memory::MemoryMatchStore,
        state::{match_record::tests::deck, questions::tests::letter},
    };

    fn repository() -> MatchRepository {
        MatchRepository::new(Arc::new(MemoryMatchStore::new()))
    }

    #[tokio::test]
    async fn create_writes_a_waiting_record() {
        let repo = repository();
        let created = repo.create_match("alice", deck()).await.unwrap();
        let stored = repo.get(&created.match_id).await.unwrap();
        assert_eq!(stored, created);
        assert_eq!(stored.state, MatchState::Waiting);
        assert_eq!((stored.host_lives, stored.joiner_lives), (3, 3));
    }

    #[tokio::test]
    async fn join_rules() {
        let repo = repository();
        let created = repo.create_match("alice", deck()).await.unwrap();
        let id = created.match_id.as_str();

        assert!(matches!(
            repo.join_match(id, "alice").await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            repo.join_match("nope", "bob").await,
            Err(ServiceError::MatchNotFound(_))
        ));

        let joined = repo.join_match(id, "bob").await.unwrap();
        assert_eq!(joined.state, MatchState::InProgress);
        assert_eq!(repo.get(id).await.unwrap(), joined);

        assert_eq!(repo.join_match(id, "bob").await.unwrap(), joined);
        assert!(matches!(
            repo.join_match(id, "carol").await,
            Err(ServiceError::MatchFull(_))
        ));
    }

    #[tokio::test]
    async fn answers_are_written_once_per_question() {
        let repo = repository();
        let id = repo.create_match("alice", deck()).await.unwrap().match_id;
        assert!(matches!(
            repo.submit_answer(&id, 0, Side::Host, letter("a")).await,
            Err(ServiceError::WriteConflict)
        ));

        repo.join_match(&id, "bob").await.unwrap();
        repo.submit_answer(&id, 0, Side::Host, letter("a"))
            .await
            .unwrap();
        assert!(matches!(
            repo.submit_answer(&id, 0, Side::Host, letter("b")).await,
            Err(ServiceError::WriteConflict)
        ));
        assert!(matches!(
            repo.submit_answer(&id, 1, Side::Joiner, letter("b")).await,
            Err(ServiceError::WriteConflict)
        ));

        let record = repo.get(&id).await.unwrap();
        assert_eq!(record.host_answer, Some(letter("a")));
        assert_eq!(record.joiner_answer, None);
    }

    #[tokio::test]
    async fn open_matches_skip_joined_and_malformed_records() {
        let store = Arc::new(MemoryMatchStore::new());
        let repo = MatchRepository::new(store.clone());
        let first = repo.create_match("alice", deck()).await.unwrap();
        let second = repo.create_match("carol", deck()).await.unwrap();
        let joined = repo.create_match("dave", deck()).await.unwrap();
        repo.join_match(&joined.match_id, "bob").await.unwrap();
        store
            .write_fields(
                MATCH_NAMESPACE,
                "broken",
                FieldMap::from_iter([field(fields::STATE, json!("waiting"))]),
            )
            .await
            .unwrap();

        let open = repo.list_open_matches().await.unwrap();
        let ids: Vec<&str> = open.iter().map(|r| r.match_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.match_id.as_str()));
        assert!(ids.contains(&second.match_id.as_str()));
        assert!(open[0].timestamp >= open[1].timestamp);
    }

    #[tokio::test]
    async fn watch_quarantines_malformed_snapshots() {
        let store = Arc::new(MemoryMatchStore::new());
        let repo = MatchRepository::new(store.clone());
        let id = repo.create_match("alice", deck()).await.unwrap().match_id;
        let mut stream = repo.watch(&id).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        store
            .write_fields(
                MATCH_NAMESPACE,
                &id,
                FieldMap::from_iter([field(fields::HOST_LIVES, json!(9))]),
            )
            .await
            .unwrap();
        assert!(matches!(
            stream.next().await,
            Some(Err(ServiceError::Corrupted { .. }))
        ));
    }
}
