//! Per-player match controller.
//!
//! Each controller is one task multiplexing the match's snapshot stream, a
//! local countdown ticker, UI commands and a cancellation token. All writes
//! are awaited inside that task, so a controller never has more than one
//! write in flight.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::{
    config::ControllerSettings,
    dto::view::{ConnectionStatus, MatchOutcome, MatchViewState},
    error::ServiceError,
    services::match_repository::{MatchRepository, RecordStream},
    state::{
        match_record::{AnswerLetter, MatchRecord, MatchState, Side, Winner},
        questions::QuestionBank,
        resolution::{Resolution, resolve},
        state_machine::is_forward,
    },
};

const COMMAND_CAPACITY: usize = 8;

/// Player seat a controller acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    /// Match the seat belongs to.
    pub match_id: String,
    /// Player sitting in it.
    pub player_id: String,
    /// Seat `player_id` holds in the match.
    pub side: Side,
}

/// Requests sent from the UI side to a running controller.
#[derive(Debug)]
pub enum ControllerCommand {
    /// Answer the current question; `reply` carries the write outcome.
    SubmitAnswer {
        letter: AnswerLetter,
        reply: oneshot::Sender<Result<(), ServiceError>>,
    },
}

/// Handle to a running controller. Dropping the last clone stops it.
#[derive(Clone)]
pub struct MatchHandle {
    seat: Arc<Seat>,
    view: watch::Receiver<MatchViewState>,
    commands: mpsc::Sender<ControllerCommand>,
    cancel: CancellationToken,
    _guard: Arc<DropGuard>,
}

impl MatchHandle {
    /// Seat this controller acts for.
    pub fn seat(&self) -> &Seat {
        &self.seat
    }

    /// Stream of views; the current one is available immediately.
    pub fn observe(&self) -> watch::Receiver<MatchViewState> {
        self.view.clone()
    }

    /// Latest published view.
    pub fn current_view(&self) -> MatchViewState {
        self.view.borrow().clone()
    }

    /// Submit this player's answer to the current question.
    ///
    /// Repeats for a question already answered are accepted without a write.
    pub async fn submit_answer(&self, letter: AnswerLetter) -> Result<(), ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ControllerCommand::SubmitAnswer { letter, reply })
            .await
            .map_err(|_| controller_stopped())?;
        response.await.map_err(|_| controller_stopped())?
    }

    /// Stop the controller. No write is issued afterwards.
    pub fn leave(&self) {
        self.cancel.cancel();
    }

    /// Whether the controller task is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed() && !self.cancel.is_cancelled()
    }
}

fn controller_stopped() -> ServiceError {
    ServiceError::InvalidState("match controller has stopped".into())
}

/// Countdown of the question currently shown.
#[derive(Debug, Clone, Copy, Default)]
struct Countdown {
    question: Option<u32>,
    secs: u8,
}

/// Task keeping one player's view of a match in sync with the shared record.
pub struct MatchController {
    repository: MatchRepository,
    questions: Arc<QuestionBank>,
    settings: ControllerSettings,
    seat: Arc<Seat>,
    latest: Option<MatchRecord>,
    countdown: Countdown,
    ticks: u32,
    /// Question whose resolution this controller already wrote (or is writing).
    resolved_question: Option<u32>,
    /// Question this player already answered, with the letter sent.
    answered: Option<(u32, AnswerLetter)>,
    connection: ConnectionStatus,
    error: Option<String>,
    finished: bool,
    view: watch::Sender<MatchViewState>,
    commands: mpsc::Receiver<ControllerCommand>,
    cancel: CancellationToken,
}

impl MatchController {
    fn new(
        repository: MatchRepository,
        questions: Arc<QuestionBank>,
        settings: ControllerSettings,
        seat: Seat,
        cancel: CancellationToken,
    ) -> (Self, MatchHandle) {
        let seat = Arc::new(seat);
        let (view_tx, view_rx) =
            watch::channel(MatchViewState::connecting(seat.match_id.clone(), seat.side));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        let handle = MatchHandle {
            seat: seat.clone(),
            view: view_rx,
            commands: command_tx,
            cancel: cancel.clone(),
            _guard: Arc::new(cancel.clone().drop_guard()),
        };

        let controller = Self {
            repository,
            questions,
            settings,
            seat,
            latest: None,
            countdown: Countdown::default(),
            ticks: 0,
            resolved_question: None,
            answered: None,
            connection: ConnectionStatus::Connecting,
            error: None,
            finished: false,
            view: view_tx,
            commands: command_rx,
            cancel,
        };

        (controller, handle)
    }

    /// Start a controller for `seat` on the current runtime.
    pub fn spawn(
        repository: MatchRepository,
        questions: Arc<QuestionBank>,
        settings: ControllerSettings,
        seat: Seat,
        cancel: CancellationToken,
    ) -> MatchHandle {
        let (controller, handle) = Self::new(repository, questions, settings, seat, cancel);
        tokio::spawn(controller.run());
        handle
    }

    async fn run(mut self) {
        let tick = self.settings.tick;
        let mut ticker = interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut snapshots: Option<RecordStream> = None;
        let mut reconnect_delay = self.settings.reconnect_initial;
        let mut resubscribe_at = Some(Instant::now());

        info!(match_id = %self.seat.match_id, side = %self.seat.side, "match controller started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!(match_id = %self.seat.match_id, "match controller cancelled");
                    break;
                }

                () = sleep_until(resubscribe_at.unwrap_or_else(Instant::now)), if resubscribe_at.is_some() => {
                    match self.repository.watch(&self.seat.match_id).await {
                        Ok(stream) => {
                            snapshots = Some(stream);
                            resubscribe_at = None;
                            self.connection = ConnectionStatus::Connected;
                            self.publish();
                        }
                        Err(err) => {
                            warn!(match_id = %self.seat.match_id, error = %err, "failed to subscribe to match");
                            resubscribe_at = Some(Instant::now() + reconnect_delay);
                            reconnect_delay = (reconnect_delay * 2).min(self.settings.reconnect_max);
                        }
                    }
                }

                item = next_snapshot(&mut snapshots) => match item {
                    Some(Ok(record)) => {
                        reconnect_delay = self.settings.reconnect_initial;
                        self.on_snapshot(record).await;
                    }
                    Some(Err(err @ ServiceError::Corrupted { .. })) => {
                        warn!(match_id = %self.seat.match_id, error = %err, "quarantined malformed snapshot");
                    }
                    other => {
                        snapshots = None;
                        let reason = match other {
                            Some(Err(err)) => err.to_string(),
                            _ => "snapshot stream ended".to_string(),
                        };
                        self.on_disconnect(&reason).await;
                        resubscribe_at = Some(Instant::now() + reconnect_delay);
                        reconnect_delay = (reconnect_delay * 2).min(self.settings.reconnect_max);
                    }
                },

                Some(command) = self.commands.recv() => {
                    self.on_command(command).await;
                }

                _ = ticker.tick() => {
                    self.on_tick().await;
                }
            }

            if self.finished {
                info!(match_id = %self.seat.match_id, side = %self.seat.side, "match finished; controller stopping");
                break;
            }
        }
    }

    async fn on_snapshot(&mut self, record: MatchRecord) {
        if let Some(latest) = &self.latest
            && is_stale(latest, &record)
        {
            debug!(
                match_id = %self.seat.match_id,
                index = record.current_question_index,
                "ignoring stale snapshot"
            );
            return;
        }

        let index = record.current_question_index;
        if self.countdown.question != Some(index) {
            self.countdown = Countdown {
                question: Some(index),
                secs: record.time_left,
            };
            self.ticks = 0;
        } else if record.time_left < self.countdown.secs {
            self.countdown.secs = record.time_left;
        }

        self.finished = record.state == MatchState::Finished;
        self.latest = Some(record);
        self.try_resolve().await;
        self.publish();
    }

    /// Re-read once so play resumes from the latest value while re-subscribing.
    async fn on_disconnect(&mut self, reason: &str) {
        warn!(match_id = %self.seat.match_id, reason, "match watch disconnected");
        self.connection = ConnectionStatus::Reconnecting;
        self.publish();

        match self.repository.find(&self.seat.match_id).await {
            Ok(Some(record)) => self.on_snapshot(record).await,
            Ok(None) => warn!(match_id = %self.seat.match_id, "match vanished during reconnect"),
            Err(err) => debug!(match_id = %self.seat.match_id, error = %err, "re-read after disconnect failed"),
        }
    }

    async fn on_tick(&mut self) {
        let Some(record) = &self.latest else {
            return;
        };
        if record.state != MatchState::InProgress {
            return;
        }
        let question_index = record.current_question_index;

        if self.countdown.secs > 0 {
            self.countdown.secs -= 1;
            self.ticks += 1;

            let every = self.settings.time_sync_every;
            if self.seat.side == Side::Host && every > 0 && self.ticks % every == 0 {
                self.publish_time_left(question_index).await;
            }
        }

        self.try_resolve().await;
        self.publish();
    }

    async fn publish_time_left(&self, question_index: u32) {
        if self.cancel.is_cancelled() {
            return;
        }
        match self
            .repository
            .publish_time_left(&self.seat.match_id, question_index, self.countdown.secs)
            .await
        {
            Ok(()) | Err(ServiceError::WriteConflict) => {}
            Err(err) => {
                debug!(match_id = %self.seat.match_id, error = %err, "failed to publish countdown")
            }
        }
    }

    async fn on_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::SubmitAnswer { letter, reply } => {
                let result = self.submit_answer(letter).await;
                let _ = reply.send(result);
                self.publish();
            }
        }
    }

    async fn submit_answer(&mut self, letter: AnswerLetter) -> Result<(), ServiceError> {
        let record = self
            .latest
            .as_ref()
            .ok_or_else(|| ServiceError::InvalidState("match not loaded yet".into()))?;
        if record.state != MatchState::InProgress {
            return Err(ServiceError::InvalidState(
                "match is not in progress".into(),
            ));
        }

        let question_index = record.current_question_index;
        let already_answered = matches!(self.answered, Some((index, _)) if index == question_index);
        if already_answered || record.answer(self.seat.side).is_some() {
            return Ok(());
        }

        let question = self
            .questions
            .question(&record.deck, question_index)
            .ok_or_else(|| ServiceError::InvalidState("question not found in local bank".into()))?;
        if letter.index() >= question.options.len() {
            return Err(ServiceError::InvalidInput(format!(
                "option `{letter}` does not exist"
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(controller_stopped());
        }

        match self
            .repository
            .submit_answer(&self.seat.match_id, question_index, self.seat.side, letter)
            .await
        {
            Ok(()) => {
                self.answered = Some((question_index, letter));
                self.error = None;
                Ok(())
            }
            // The question closed before the answer landed; the next snapshot moves the view on.
            Err(ServiceError::WriteConflict) => {
                debug!(
                    match_id = %self.seat.match_id,
                    index = question_index,
                    "answer window already closed"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Resolution due for `record`, unless `record` already reflects it.
    fn resolution_for(&self, record: &MatchRecord, timer_expired: bool) -> Option<Resolution> {
        let Some(question) = self
            .questions
            .question(&record.deck, record.current_question_index)
        else {
            error!(
                match_id = %self.seat.match_id,
                topic = %record.deck.topic,
                level = %record.deck.level,
                "current question missing from local bank"
            );
            return None;
        };
        resolve(record, question.answer, timer_expired)
            .filter(|resolution| !resolution.is_reflected_in(record))
    }

    async fn try_resolve(&mut self) {
        let Some(record) = self.latest.clone() else {
            return;
        };
        let timer_expired = self.countdown.secs == 0;
        let Some(resolution) = self.resolution_for(&record, timer_expired) else {
            return;
        };
        if self.resolved_question == Some(resolution.question_index) {
            return;
        }
        self.resolved_question = Some(resolution.question_index);

        match self.write_resolution(&resolution).await {
            Ok(()) => self.error = None,
            Err(err) if err.is_transient() => {
                self.retry_resolution(err, resolution.question_index, timer_expired)
                    .await
            }
            Err(err) => self.fail_resolution(err),
        }
    }

    async fn write_resolution(&self, resolution: &Resolution) -> Result<(), ServiceError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        match self
            .repository
            .advance_or_finish(&self.seat.match_id, resolution)
            .await
        {
            Err(ServiceError::WriteConflict) => {
                debug!(
                    match_id = %self.seat.match_id,
                    index = resolution.question_index,
                    "question already resolved by the opponent"
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Retry a failed resolution once, recomputed from a fresh read.
    ///
    /// `timer_expired` belongs to `question_index`; once the fresh record moved
    /// past that question the opponent resolved it and nothing is written.
    async fn retry_resolution(
        &mut self,
        first: ServiceError,
        question_index: u32,
        timer_expired: bool,
    ) {
        warn!(match_id = %self.seat.match_id, error = %first, "resolution write failed; retrying once");
        tokio::select! {
            () = sleep(self.settings.write_retry_delay) => {}
            () = self.cancel.cancelled() => return,
        }

        let fresh = match self.repository.find(&self.seat.match_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.fail_resolution(ServiceError::MatchNotFound(self.seat.match_id.clone()));
                return;
            }
            Err(err) => {
                self.fail_resolution(err);
                return;
            }
        };

        if fresh.state != MatchState::InProgress || fresh.current_question_index != question_index {
            debug!(
                match_id = %self.seat.match_id,
                index = question_index,
                "question resolved by the opponent during retry"
            );
            self.error = None;
            return;
        }
        let Some(resolution) = self.resolution_for(&fresh, timer_expired) else {
            return;
        };
        match self.write_resolution(&resolution).await {
            Ok(()) => self.error = None,
            Err(err) => self.fail_resolution(err),
        }
    }

    /// Surface the failure and re-arm so a later tick tries again.
    fn fail_resolution(&mut self, err: ServiceError) {
        error!(match_id = %self.seat.match_id, error = %err, "failed to resolve question");
        self.error = Some(err.to_string());
        self.resolved_question = None;
    }

    fn publish(&self) {
        let view = self.view();
        self.view.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }

    fn view(&self) -> MatchViewState {
        let side = self.seat.side;
        let mut view = MatchViewState::connecting(self.seat.match_id.clone(), side);
        view.connection = self.connection;
        view.error = self.error.clone();

        let Some(record) = &self.latest else {
            return view;
        };

        view.state = Some(record.state);
        view.question_index = record.current_question_index;
        view.host_lives = record.host_lives;
        view.joiner_lives = record.joiner_lives;
        view.opponent_answered = record.answer(side.opponent()).is_some();
        view.my_answer = record
            .answer(side)
            .or_else(|| match self.answered {
                Some((index, letter)) if index == record.current_question_index => Some(letter),
                _ => None,
            })
            .map(String::from);
        view.winner = record.winner.clone().map(String::from);

        match record.state {
            MatchState::Waiting => view.time_left = record.time_left,
            MatchState::InProgress => {
                view.time_left = self.countdown.secs;
                if let Some(question) = self
                    .questions
                    .question(&record.deck, record.current_question_index)
                {
                    view.question = Some(question.prompt.clone());
                    view.options = question.options.clone();
                }
            }
            MatchState::Finished => {
                view.time_left = 0;
                view.outcome = record.winner.as_ref().map(|winner| match winner {
                    Winner::Draw => MatchOutcome::Draw,
                    Winner::Player(id) if *id == self.seat.player_id => MatchOutcome::Won,
                    Winner::Player(_) => MatchOutcome::Lost,
                });
            }
        }

        view
    }
}

/// A snapshot older than what the controller already acted on.
fn is_stale(latest: &MatchRecord, candidate: &MatchRecord) -> bool {
    !is_forward(latest.state, candidate.state)
        || candidate.current_question_index < latest.current_question_index
}

async fn next_snapshot(
    snapshots: &mut Option<RecordStream>,
) -> Option<Result<MatchRecord, ServiceError>> {
    use futures::StreamExt;

    match snapshots {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
