mod common;

use std::time::Duration;

use common::{both_on_question, correct, duel, settings, wait_for, wrong};
use quiz_duel_back::{
    dao::models::MATCH_NAMESPACE,
    dto::view::{ConnectionStatus, MatchOutcome},
    state::match_record::{ANSWER_WINDOW_SECS, MatchState, Winner},
};

// A tick long enough that the answer window never expires during a test.
const SLOW_TICK_MS: u64 = 1_000;

#[tokio::test]
async fn correct_answer_keeps_lives_wrong_answer_costs_one() {
    let duel = duel(settings(SLOW_TICK_MS)).await;
    both_on_question(&duel, 0).await;

    duel.host.submit_answer(correct(0)).await.unwrap();
    wait_for(&duel.joiner, |view| view.opponent_answered).await;
    duel.joiner.submit_answer(wrong(0)).await.unwrap();

    let view = wait_for(&duel.host, |view| view.question_index == 1).await;
    assert_eq!((view.host_lives, view.joiner_lives), (3, 2));
    assert_eq!(view.my_answer, None);
    assert!(!view.opponent_answered);

    let record = duel.repository.get(&duel.match_id).await.unwrap();
    assert_eq!(record.current_question_index, 1);
    assert_eq!((record.host_answer, record.joiner_answer), (None, None));
    assert_eq!(record.time_left, ANSWER_WINDOW_SECS);
}

#[tokio::test]
async fn repeated_answers_keep_the_first_letter() {
    let duel = duel(settings(SLOW_TICK_MS)).await;
    both_on_question(&duel, 0).await;

    duel.joiner.submit_answer(wrong(0)).await.unwrap();
    duel.joiner.submit_answer(correct(0)).await.unwrap();

    let record = duel.repository.get(&duel.match_id).await.unwrap();
    assert_eq!(record.joiner_answer, Some(wrong(0)));
    let view = wait_for(&duel.joiner, |view| view.my_answer.is_some()).await;
    assert_eq!(view.my_answer, Some(wrong(0).to_string()));
}

#[tokio::test]
async fn host_wins_when_joiner_runs_out_of_lives() {
    let duel = duel(settings(SLOW_TICK_MS)).await;

    for index in 0..3 {
        both_on_question(&duel, index).await;
        duel.host.submit_answer(correct(index)).await.unwrap();
        duel.joiner.submit_answer(wrong(index)).await.unwrap();
    }

    let host = wait_for(&duel.host, |view| view.state == Some(MatchState::Finished)).await;
    let joiner = wait_for(&duel.joiner, |view| view.state == Some(MatchState::Finished)).await;
    assert_eq!(host.outcome, Some(MatchOutcome::Won));
    assert_eq!(joiner.outcome, Some(MatchOutcome::Lost));
    assert_eq!(host.winner.as_deref(), Some("alice"));

    let record = duel.repository.get(&duel.match_id).await.unwrap();
    assert_eq!(record.winner, Some(Winner::Player("alice".into())));
    assert_eq!((record.host_lives, record.joiner_lives), (3, 0));
    assert_eq!(record.current_question_index, 2);
}

#[tokio::test]
async fn simultaneous_last_lives_end_in_a_draw() {
    let duel = duel(settings(SLOW_TICK_MS)).await;

    for index in 0..3 {
        both_on_question(&duel, index).await;
        duel.host.submit_answer(wrong(index)).await.unwrap();
        duel.joiner.submit_answer(wrong(index)).await.unwrap();
    }

    for handle in [&duel.host, &duel.joiner] {
        let view = wait_for(handle, |view| view.state == Some(MatchState::Finished)).await;
        assert_eq!(view.outcome, Some(MatchOutcome::Draw));
        assert_eq!(view.winner.as_deref(), Some("draw"));
    }
    let record = duel.repository.get(&duel.match_id).await.unwrap();
    assert_eq!(record.winner, Some(Winner::Draw));
}

#[tokio::test]
async fn unanswered_questions_time_out_once_per_side() {
    let duel = duel(settings(5)).await;

    let view = wait_for(&duel.host, |view| view.question_index == 1).await;
    assert_eq!((view.host_lives, view.joiner_lives), (2, 2));

    let finished = wait_for(&duel.joiner, |view| view.state == Some(MatchState::Finished)).await;
    assert_eq!(finished.outcome, Some(MatchOutcome::Draw));
    let record = duel.repository.get(&duel.match_id).await.unwrap();
    assert_eq!((record.host_lives, record.joiner_lives), (0, 0));
    assert_eq!(record.current_question_index, 2);
}

#[tokio::test]
async fn finished_match_receives_no_more_writes() {
    let duel = duel(settings(5)).await;
    for handle in [&duel.host, &duel.joiner] {
        wait_for(handle, |view| view.state == Some(MatchState::Finished)).await;
    }

    let writes = duel.store.applied_writes();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(duel.store.applied_writes(), writes);
    assert!(!duel.host.is_running());
    assert!(!duel.joiner.is_running());
}

#[tokio::test]
async fn absent_player_loses_lives_to_the_peer_timer() {
    let duel = duel(settings(5)).await;
    duel.host.leave();

    for index in 0..3 {
        wait_for(&duel.joiner, |view| {
            view.question_index == index && view.question.is_some()
        })
        .await;
        duel.joiner.submit_answer(correct(index)).await.unwrap();
    }

    let view = wait_for(&duel.joiner, |view| view.state == Some(MatchState::Finished)).await;
    assert_eq!(view.outcome, Some(MatchOutcome::Won));
    assert_eq!((view.host_lives, view.joiner_lives), (0, 3));
}

#[tokio::test]
async fn dropped_watch_reconnects_and_play_continues() {
    let duel = duel(settings(SLOW_TICK_MS)).await;
    both_on_question(&duel, 0).await;

    duel.store.drop_watchers(MATCH_NAMESPACE, &duel.match_id);
    for handle in [&duel.host, &duel.joiner] {
        wait_for(handle, |view| view.connection == ConnectionStatus::Connected).await;
    }

    duel.host.submit_answer(correct(0)).await.unwrap();
    duel.joiner.submit_answer(correct(0)).await.unwrap();
    for handle in [&duel.host, &duel.joiner] {
        let view = wait_for(handle, |view| view.question_index == 1).await;
        assert_eq!((view.host_lives, view.joiner_lives), (3, 3));
    }
}

#[tokio::test]
async fn host_publishes_its_countdown() {
    let mut settings = settings(20);
    settings.time_sync_every = 2;
    let duel = duel(settings).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let record = duel.repository.get(&duel.match_id).await.unwrap();
        if record.time_left < ANSWER_WINDOW_SECS {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "countdown never published");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
