#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use quiz_duel_back::{
    config::ControllerSettings,
    dao::match_store::memory::MemoryMatchStore,
    dto::view::MatchViewState,
    services::{
        match_controller::{MatchController, MatchHandle, Seat},
        match_repository::MatchRepository,
    },
    state::{
        match_record::{AnswerLetter, Side},
        questions::{Question, QuestionBank, QuestionDeck, QuestionSet},
    },
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn letter(raw: &str) -> AnswerLetter {
    raw.parse().unwrap()
}

/// Two questions: `q1` answered with `a`, `q2` with `b`.
pub fn bank() -> Arc<QuestionBank> {
    let question = |id: &str, answer: &str| Question {
        id: id.into(),
        prompt: format!("prompt {id}"),
        options: vec!["first".into(), "second".into(), "third".into()],
        answer: letter(answer),
    };
    Arc::new(
        QuestionBank::new(vec![QuestionSet {
            topic: "capitals".into(),
            level: "a1".into(),
            questions: vec![question("q1", "a"), question("q2", "b")],
        }])
        .unwrap(),
    )
}

pub fn deck() -> QuestionDeck {
    QuestionDeck {
        topic: "capitals".into(),
        level: "a1".into(),
        order: vec!["q1".into(), "q2".into()],
    }
}

/// Correct letter of the question shown at `index`.
pub fn correct(index: u32) -> AnswerLetter {
    if index % 2 == 0 { letter("a") } else { letter("b") }
}

pub fn wrong(index: u32) -> AnswerLetter {
    if index % 2 == 0 { letter("c") } else { letter("a") }
}

pub fn settings(tick_ms: u64) -> ControllerSettings {
    ControllerSettings {
        tick: Duration::from_millis(tick_ms),
        time_sync_every: 0,
        reconnect_initial: Duration::from_millis(5),
        reconnect_max: Duration::from_millis(40),
        write_retry_delay: Duration::from_millis(5),
    }
}

pub struct Duel {
    pub store: MemoryMatchStore,
    pub repository: MatchRepository,
    pub match_id: String,
    pub host: MatchHandle,
    pub joiner: MatchHandle,
}

/// A joined match between `alice` (host) and `bob` (joiner), both controllers loaded.
pub async fn duel(settings: ControllerSettings) -> Duel {
    let store = MemoryMatchStore::new();
    let repository = MatchRepository::new(Arc::new(store.clone()));
    let created = repository.create_match("alice", deck()).await.unwrap();
    repository.join_match(&created.match_id, "bob").await.unwrap();

    let spawn = |player: &str, side: Side| {
        MatchController::spawn(
            repository.clone(),
            bank(),
            settings.clone(),
            Seat {
                match_id: created.match_id.clone(),
                player_id: player.into(),
                side,
            },
            CancellationToken::new(),
        )
    };
    let host = spawn("alice", Side::Host);
    let joiner = spawn("bob", Side::Joiner);

    for handle in [&host, &joiner] {
        wait_for(handle, |view| view.state.is_some()).await;
    }

    Duel {
        store,
        repository,
        match_id: created.match_id,
        host,
        joiner,
    }
}

/// Wait until `handle` publishes a view matching `predicate`, returning it.
pub async fn wait_for(
    handle: &MatchHandle,
    predicate: impl FnMut(&MatchViewState) -> bool,
) -> MatchViewState {
    let mut views = handle.observe();
    let view = timeout(WAIT, views.wait_for(predicate))
        .await
        .expect("timed out waiting for match view")
        .expect("controller stopped before the expected view")
        .clone();
    view
}

/// Wait until both controllers show question `index` in progress.
pub async fn both_on_question(duel: &Duel, index: u32) {
    for handle in [&duel.host, &duel.joiner] {
        wait_for(handle, |view| {
            view.question_index == index && view.question.is_some()
        })
        .await;
    }
}
