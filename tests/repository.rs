mod common;

use std::sync::Arc;

use common::{deck, letter};
use futures::StreamExt;
use quiz_duel_back::{
    dao::match_store::memory::MemoryMatchStore,
    error::ServiceError,
    services::match_repository::MatchRepository,
    state::{
        match_record::{MatchState, Side},
        resolution::resolve,
    },
};

fn repository() -> (MemoryMatchStore, MatchRepository) {
    let store = MemoryMatchStore::new();
    let repository = MatchRepository::new(Arc::new(store.clone()));
    (store, repository)
}

#[tokio::test]
async fn racing_joiners_leave_exactly_one_opponent() {
    let (_store, repository) = repository();
    let created = repository.create_match("alice", deck()).await.unwrap();

    let joins = ["bob", "carol", "dave", "erin"].map(|player| {
        let repository = repository.clone();
        let match_id = created.match_id.clone();
        tokio::spawn(async move { repository.join_match(&match_id, player).await })
    });

    let mut winners = Vec::new();
    for join in joins {
        match join.await.unwrap() {
            Ok(record) => winners.push(record.joiner_id),
            Err(ServiceError::MatchFull(_)) => {}
            Err(other) => panic!("unexpected join error: {other}"),
        }
    }
    assert_eq!(winners.len(), 1);

    let record = repository.get(&created.match_id).await.unwrap();
    assert_eq!(record.joiner_id, winners[0]);
    assert_eq!(record.state, MatchState::InProgress);
}

#[tokio::test]
async fn racing_resolutions_apply_once() {
    let (store, repository) = repository();
    let created = repository.create_match("alice", deck()).await.unwrap();
    repository.join_match(&created.match_id, "bob").await.unwrap();
    repository
        .submit_answer(&created.match_id, 0, Side::Host, letter("a"))
        .await
        .unwrap();
    repository
        .submit_answer(&created.match_id, 0, Side::Joiner, letter("b"))
        .await
        .unwrap();

    let snapshot = repository.get(&created.match_id).await.unwrap();
    let resolution = resolve(&snapshot, letter("a"), false).unwrap();

    let before = store.applied_writes();
    let first = repository
        .advance_or_finish(&created.match_id, &resolution)
        .await;
    let second = repository
        .advance_or_finish(&created.match_id, &resolution)
        .await;
    assert!(first.is_ok());
    assert!(matches!(second, Err(ServiceError::WriteConflict)));
    assert_eq!(store.applied_writes(), before + 1);

    let record = repository.get(&created.match_id).await.unwrap();
    assert_eq!(record, resolution.apply_to(&snapshot));
}

#[tokio::test]
async fn watch_starts_with_the_current_value_and_follows_writes() {
    let (_store, repository) = repository();
    let created = repository.create_match("alice", deck()).await.unwrap();
    let mut snapshots = repository.watch(&created.match_id).await.unwrap();

    let first = snapshots.next().await.unwrap().unwrap();
    assert_eq!(first.state, MatchState::Waiting);

    repository.join_match(&created.match_id, "bob").await.unwrap();
    let joined = snapshots.next().await.unwrap().unwrap();
    assert_eq!(joined.state, MatchState::InProgress);
    assert_eq!(joined.joiner_id.as_deref(), Some("bob"));
}

#[tokio::test]
async fn transient_store_failures_surface_as_unavailable() {
    let (store, repository) = repository();
    store.fail_next_writes(1);
    let err = repository.create_match("alice", deck()).await.unwrap_err();
    assert!(err.is_transient());
    assert!(repository.create_match("alice", deck()).await.is_ok());
}
