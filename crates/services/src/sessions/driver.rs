use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use testprep_core::model::{CompletionSummary, ProgressSummary, SessionStatus};

use crate::error::{DriverError, RunnerError};
use crate::sink::TransportError;

use super::runner::{TestSessionRunner, TickReport};

#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub tick_period: Duration,
    pub auto_submit_retry_delay: Duration,
    /// Total delivery attempts after the countdown expires, the first one included.
    pub max_auto_submit_attempts: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            auto_submit_retry_delay: Duration::from_secs(2),
            max_auto_submit_attempts: 5,
        }
    }
}

/// Student actions forwarded to the runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    Navigate(usize),
    Next,
    Previous,
    Answer(String),
    ToggleFlag,
    Pause,
    Resume,
    Submit,
    /// Changes nothing; answered with an `Applied` event carrying progress.
    Status,
}

#[derive(Debug)]
pub enum SessionEvent {
    Ticked {
        elapsed_seconds: u64,
        remaining_seconds: Option<u32>,
    },
    Applied {
        command: SessionCommand,
        current_index: usize,
        progress: ProgressSummary,
    },
    Rejected {
        command: SessionCommand,
        error: RunnerError,
    },
    SubmitFailed(RunnerError),
    Completed(CompletionSummary),
}

/// Scheduling loop for a [`TestSessionRunner`].
///
/// Ticks the runner once per `tick_period`, applies commands as they arrive
/// and reports what happened on the event channel. Returns once the session
/// completes. If the countdown expires and delivery fails, the same payload is
/// retried after `auto_submit_retry_delay` until `max_auto_submit_attempts`.
#[derive(Clone, Debug, Default)]
pub struct SessionDriver {
    config: DriverConfig,
}

impl SessionDriver {
    #[must_use]
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Run `runner` to completion, activating it first if needed.
    ///
    /// A session left `Submitting` by an earlier run can be driven again: a
    /// `Submit` command re-sends its kept payload.
    ///
    /// Events are best-effort: a dropped or unread receiver does not hold up
    /// ticks or commands.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::CommandsClosed` if the command sender goes away
    /// before completion, `DriverError::AutoSubmitExhausted` when forced
    /// submission keeps failing, and `DriverError::Runner` if the runner cannot
    /// be activated.
    pub async fn run(
        &self,
        runner: &mut TestSessionRunner,
        commands: &mut mpsc::Receiver<SessionCommand>,
        events: &mpsc::Sender<SessionEvent>,
    ) -> Result<CompletionSummary, DriverError> {
        if runner.status() == SessionStatus::NotStarted {
            runner.activate()?;
        }
        if let Some(summary) = runner.summary() {
            return Ok(summary.clone());
        }

        let mut ticker = time::interval(self.config.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick fires immediately; the session's first second
        // has not passed yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => match runner.tick().await {
                    TickReport::Idle => {}
                    TickReport::Running { elapsed_seconds, remaining_seconds } => {
                        emit(events, SessionEvent::Ticked { elapsed_seconds, remaining_seconds });
                    }
                    TickReport::AutoSubmitted(summary) => {
                        info!(session_id = %runner.session_id(), "auto-submitted on expiry");
                        emit(events, SessionEvent::Completed(summary.clone()));
                        return Ok(summary);
                    }
                    TickReport::AutoSubmitFailed(RunnerError::SubmissionFailed(err)) => {
                        emit(events, SessionEvent::SubmitFailed(RunnerError::SubmissionFailed(err.clone())));
                        let summary = self.retry_auto_submit(runner, events, err).await?;
                        emit(events, SessionEvent::Completed(summary.clone()));
                        return Ok(summary);
                    }
                    TickReport::AutoSubmitFailed(other) => return Err(other.into()),
                },
                command = commands.recv() => {
                    let Some(command) = command else {
                        return Err(DriverError::CommandsClosed);
                    };
                    if let Some(summary) = apply(runner, command, events).await {
                        emit(events, SessionEvent::Completed(summary.clone()));
                        return Ok(summary);
                    }
                }
            }
        }
    }

    async fn retry_auto_submit(
        &self,
        runner: &mut TestSessionRunner,
        events: &mpsc::Sender<SessionEvent>,
        first_error: TransportError,
    ) -> Result<CompletionSummary, DriverError> {
        let mut last_error = first_error;
        for attempt in 2..=self.config.max_auto_submit_attempts {
            warn!(
                session_id = %runner.session_id(),
                attempt,
                error = %last_error,
                "retrying auto-submit"
            );
            time::sleep(self.config.auto_submit_retry_delay).await;

            match runner.submit().await {
                Ok(summary) => return Ok(summary),
                Err(RunnerError::SubmissionFailed(err)) => {
                    emit(events, SessionEvent::SubmitFailed(RunnerError::SubmissionFailed(err.clone())));
                    last_error = err;
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(DriverError::AutoSubmitExhausted {
            attempts: self.config.max_auto_submit_attempts.max(1),
            source: last_error,
        })
    }
}

/// Apply one command. Returns the summary if it completed the session.
async fn apply(
    runner: &mut TestSessionRunner,
    command: SessionCommand,
    events: &mpsc::Sender<SessionEvent>,
) -> Option<CompletionSummary> {
    let result = match &command {
        SessionCommand::Navigate(index) => runner.navigate(*index),
        SessionCommand::Next => runner.next(),
        SessionCommand::Previous => runner.previous(),
        SessionCommand::Answer(answer) => runner.select_answer(answer.clone()),
        SessionCommand::ToggleFlag => runner.toggle_flag().map(|_| ()),
        SessionCommand::Pause => runner.pause(),
        SessionCommand::Resume => runner.resume(),
        SessionCommand::Status => Ok(()),
        SessionCommand::Submit => match runner.submit().await {
            Ok(summary) => return Some(summary),
            Err(error @ RunnerError::SubmissionFailed(_)) => {
                emit(events, SessionEvent::SubmitFailed(error));
                return None;
            }
            Err(error) => Err(error),
        },
    };

    match result {
        Ok(()) => {
            let event = SessionEvent::Applied {
                command,
                current_index: runner.current_index(),
                progress: runner.progress(),
            };
            emit(events, event);
        }
        Err(error) => emit(events, SessionEvent::Rejected { command, error }),
    }
    None
}

/// Never waits on the receiver: a full or closed channel drops the event.
fn emit(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(?event, "event channel full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use testprep_core::model::{Question, QuestionId, SessionId, TimingMode};
    use testprep_core::time::fixed_clock;

    use crate::sink::InMemorySubmissionSink;

    fn runner(timing: TimingMode, sink: &InMemorySubmissionSink) -> TestSessionRunner {
        let questions = (0..2)
            .map(|i| Question::choice(QuestionId::new(i), "Q", ["A", "B"]).unwrap())
            .collect();
        TestSessionRunner::new(
            SessionId::new(5),
            questions,
            timing,
            Arc::new(sink.clone()),
            fixed_clock(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_auto_submits_once() {
        let sink = InMemorySubmissionSink::new();
        let mut runner = runner(TimingMode::timed(3).unwrap(), &sink);
        let (_commands_tx, mut commands_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(64);

        let summary = SessionDriver::default()
            .run(&mut runner, &mut commands_rx, &events_tx)
            .await
            .unwrap();

        assert_eq!(summary.session_id, SessionId::new(5));
        assert_eq!(sink.call_count(), 1);
        assert_eq!(runner.status(), SessionStatus::Completed);
        assert_eq!(sink.calls()[0].session_elapsed_seconds, 3);

        let mut ticked = 0;
        while let Ok(event) = events_rx.try_recv() {
            if matches!(event, SessionEvent::Ticked { .. }) {
                ticked += 1;
            }
        }
        assert_eq!(ticked, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_auto_submit_is_retried_with_same_payload() {
        let sink = InMemorySubmissionSink::new();
        sink.fail_next(TransportError::Timeout);
        sink.fail_next(TransportError::HttpStatus(503));
        let mut runner = runner(TimingMode::timed(1).unwrap(), &sink);
        let (_commands_tx, mut commands_rx) = mpsc::channel(8);
        let (events_tx, _events_rx) = mpsc::channel(64);

        SessionDriver::default()
            .run(&mut runner, &mut commands_rx, &events_tx)
            .await
            .unwrap();

        let calls = sink.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|payload| payload == &calls[0]));
        assert_eq!(runner.status(), SessionStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_submit_gives_up_after_max_attempts() {
        let sink = InMemorySubmissionSink::new();
        for _ in 0..3 {
            sink.fail_next(TransportError::Timeout);
        }
        let mut runner = runner(TimingMode::timed(1).unwrap(), &sink);
        let (_commands_tx, mut commands_rx) = mpsc::channel(8);
        let (events_tx, _events_rx) = mpsc::channel(64);
        let driver = SessionDriver::new(DriverConfig {
            max_auto_submit_attempts: 3,
            ..DriverConfig::default()
        });

        let err = driver
            .run(&mut runner, &mut commands_rx, &events_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::AutoSubmitExhausted { attempts: 3, .. }));
        assert_eq!(runner.status(), SessionStatus::Submitting);
        assert_eq!(sink.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_session_can_be_submitted_on_a_later_run() {
        let sink = InMemorySubmissionSink::new();
        sink.fail_next(TransportError::Timeout);
        sink.fail_next(TransportError::Timeout);
        let mut runner = runner(TimingMode::timed(2).unwrap(), &sink);
        let (commands_tx, mut commands_rx) = mpsc::channel(8);
        let (events_tx, _events_rx) = mpsc::channel(64);
        let driver = SessionDriver::new(DriverConfig {
            max_auto_submit_attempts: 2,
            ..DriverConfig::default()
        });

        let err = driver
            .run(&mut runner, &mut commands_rx, &events_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::AutoSubmitExhausted { attempts: 2, .. }));

        commands_tx.send(SessionCommand::Submit).await.unwrap();
        let summary = driver
            .run(&mut runner, &mut commands_rx, &events_tx)
            .await
            .unwrap();

        assert_eq!(summary.session_id, SessionId::new(5));
        assert_eq!(runner.status(), SessionStatus::Completed);
        let calls = sink.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|payload| payload == &calls[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn commands_drive_a_manual_submission() {
        let sink = InMemorySubmissionSink::new();
        let mut runner = runner(TimingMode::Untimed, &sink);
        let (commands_tx, mut commands_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(64);

        commands_tx.send(SessionCommand::Answer("B".into())).await.unwrap();
        commands_tx.send(SessionCommand::Navigate(5)).await.unwrap();
        commands_tx.send(SessionCommand::Next).await.unwrap();
        commands_tx.send(SessionCommand::Status).await.unwrap();
        commands_tx.send(SessionCommand::Submit).await.unwrap();

        SessionDriver::default()
            .run(&mut runner, &mut commands_rx, &events_tx)
            .await
            .unwrap();

        let payload = &sink.calls()[0];
        assert_eq!(payload.answers[0].answer.as_deref(), Some("B"));
        assert_eq!(payload.answers[1].answer, None);

        let mut rejected = Vec::new();
        let mut status_progress = None;
        while let Ok(event) = events_rx.try_recv() {
            match event {
                SessionEvent::Rejected { command, error } => rejected.push((command, error)),
                SessionEvent::Applied {
                    command: SessionCommand::Status,
                    progress,
                    ..
                } => status_progress = Some(progress),
                _ => {}
            }
        }
        let progress = status_progress.unwrap();
        assert_eq!((progress.total, progress.answered), (2, 1));
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, SessionCommand::Navigate(5));
        assert!(matches!(rejected[0].1, RunnerError::OutOfRange { index: Some(5), len: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn unread_event_channel_does_not_stall_the_session() {
        let sink = InMemorySubmissionSink::new();
        let mut runner = runner(TimingMode::Untimed, &sink);
        let (commands_tx, mut commands_rx) = mpsc::channel(8);
        let (events_tx, _events_rx) = mpsc::channel(4);

        tokio::spawn(async move {
            time::sleep(Duration::from_millis(30_500)).await;
            commands_tx.send(SessionCommand::Submit).await.unwrap();
        });

        let summary = time::timeout(
            Duration::from_secs(120),
            SessionDriver::default().run(&mut runner, &mut commands_rx, &events_tx),
        )
        .await
        .expect("driver stalled on a full event channel")
        .unwrap();

        assert_eq!(summary.session_id, SessionId::new(5));
        assert_eq!(sink.call_count(), 1);
        assert_eq!(sink.calls()[0].session_elapsed_seconds, 30);
        assert_eq!(runner.status(), SessionStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn full_event_channel_does_not_delay_auto_submit() {
        let sink = InMemorySubmissionSink::new();
        let mut runner = runner(TimingMode::timed(20).unwrap(), &sink);
        let (_commands_tx, mut commands_rx) = mpsc::channel(8);
        let (events_tx, _events_rx) = mpsc::channel(2);

        time::timeout(
            Duration::from_secs(60),
            SessionDriver::default().run(&mut runner, &mut commands_rx, &events_tx),
        )
        .await
        .expect("countdown stopped on a full event channel")
        .unwrap();

        assert_eq!(sink.call_count(), 1);
        assert_eq!(sink.calls()[0].session_elapsed_seconds, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_command_channel_stops_driver() {
        let sink = InMemorySubmissionSink::new();
        let mut runner = runner(TimingMode::Untimed, &sink);
        let (commands_tx, mut commands_rx) = mpsc::channel::<SessionCommand>(1);
        drop(commands_tx);
        let (events_tx, _events_rx) = mpsc::channel(8);

        let err = SessionDriver::default()
            .run(&mut runner, &mut commands_rx, &events_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::CommandsClosed));
        assert_eq!(runner.status(), SessionStatus::InProgress);
    }
}
