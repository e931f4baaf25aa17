mod commands;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use services::{
    Clock, DriverError, HttpSubmissionSink, InMemorySubmissionSink, SessionCommand, SessionDriver,
    SessionEvent, SubmissionSink, TestSessionRunner,
};
use testprep_core::model::{CompletionSummary, Question, SessionId, SessionStatus, TimingMode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::commands::{HELP, Input, parse_line};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    MissingQuestions,
    InvalidDuration { raw: String },
    InvalidSessionId { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::MissingQuestions => {
                write!(f, "a question file is required (--questions or TESTPREP_QUESTIONS)")
            }
            ArgsError::InvalidDuration { raw } => {
                write!(f, "invalid --duration value (positive seconds): {raw}")
            }
            ArgsError::InvalidSessionId { raw } => write!(f, "invalid --session-id value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  testprep --questions <file.json> [--duration <secs>] [--session-id <id>]");
    eprintln!("           [--offline] [--print-snapshot]");
    eprintln!();
    eprintln!("Without --duration the session is untimed.");
    eprintln!("Without --offline answers are submitted to TESTPREP_API_BASE_URL.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TESTPREP_QUESTIONS, TESTPREP_DURATION_SECS, TESTPREP_SESSION_ID");
    eprintln!("  TESTPREP_API_BASE_URL, TESTPREP_API_TOKEN, TESTPREP_API_TIMEOUT_SECS");
    eprintln!("  RUST_LOG (default: warn)");
}

#[derive(Debug)]
struct Args {
    questions: PathBuf,
    timing: TimingMode,
    session_id: SessionId,
    offline: bool,
    print_snapshot: bool,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut questions = std::env::var("TESTPREP_QUESTIONS").ok().map(PathBuf::from);
        let mut timing = match std::env::var("TESTPREP_DURATION_SECS") {
            Ok(raw) => parse_duration(raw)?,
            Err(_) => TimingMode::Untimed,
        };
        let mut session_id = match std::env::var("TESTPREP_SESSION_ID") {
            Ok(raw) => parse_session_id(raw)?,
            Err(_) => SessionId::new(1),
        };
        let mut offline = false;
        let mut print_snapshot = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--questions" => {
                    questions = Some(PathBuf::from(require_value(args, "--questions")?));
                }
                "--duration" => timing = parse_duration(require_value(args, "--duration")?)?,
                "--session-id" => {
                    session_id = parse_session_id(require_value(args, "--session-id")?)?;
                }
                "--offline" => offline = true,
                "--print-snapshot" => print_snapshot = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            questions: questions.ok_or(ArgsError::MissingQuestions)?,
            timing,
            session_id,
            offline,
            print_snapshot,
        })
    }
}

fn parse_duration(raw: String) -> Result<TimingMode, ArgsError> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .and_then(|secs| TimingMode::timed(secs).ok())
        .ok_or(ArgsError::InvalidDuration { raw })
}

fn parse_session_id(raw: String) -> Result<SessionId, ArgsError> {
    raw.parse().map_err(|_| ArgsError::InvalidSessionId { raw })
}

fn load_questions(path: &Path) -> Result<Vec<Question>, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(path)
        .map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    let questions = serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| format!("cannot read questions from {}: {e}", path.display()))?;
    Ok(questions)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_question(questions: &[Question], index: usize) {
    let Some(question) = questions.get(index) else {
        return;
    };
    println!();
    println!("Question {} of {}", index + 1, questions.len());
    println!("{}", question.prompt());
    match question.options() {
        Some(options) => {
            for option in options {
                println!("  - {option}");
            }
        }
        None => println!("  (free text)"),
    }
}

fn print_summary(summary: &CompletionSummary) {
    println!();
    println!("Session {} submitted.", summary.session_id);
    match summary.score {
        Some(score) => println!(
            "Score: {}/{} ({:.0}%)",
            score.correct,
            score.total,
            score.percent()
        ),
        None => println!("Score will be available once grading finishes."),
    }
    if let Some(message) = &summary.message {
        println!("{message}");
    }
}

async fn read_commands(commands: mpsc::Sender<SessionCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_line(&line) {
            Ok(Input::Command(command)) => {
                if commands.send(command).await.is_err() {
                    return;
                }
            }
            Ok(Input::Help) => println!("{HELP}"),
            Ok(Input::Quit) => return,
            Err(err) => println!("{err}"),
        }
    }
}

async fn print_events(mut events: mpsc::Receiver<SessionEvent>, questions: Vec<Question>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Ticked {
                remaining_seconds: Some(remaining),
                ..
            } if remaining <= 10 || remaining % 60 == 0 => {
                println!("[{}:{:02} left]", remaining / 60, remaining % 60);
            }
            SessionEvent::Ticked { .. } => {}
            SessionEvent::Applied {
                command,
                current_index,
                progress,
            } => {
                use SessionCommand as C;
                match command {
                    C::Navigate(_) | C::Next | C::Previous => print_question(&questions, current_index),
                    C::Pause => println!("Paused. Type `resume` to continue."),
                    C::Resume => println!("Resumed."),
                    _ => println!(
                        "{}/{} answered, {} flagged",
                        progress.answered, progress.total, progress.flagged
                    ),
                }
            }
            SessionEvent::Rejected { error, .. } => println!("Not allowed: {error}"),
            SessionEvent::SubmitFailed(error) => {
                println!("{error}. Your answers are kept; try `submit` again.");
            }
            SessionEvent::Completed(_) => {}
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let questions = load_questions(&args.questions)?;
    tracing::info!(
        questions = questions.len(),
        offline = args.offline,
        timing = ?args.timing,
        "starting session"
    );
    let sink: Arc<dyn SubmissionSink> = if args.offline {
        Arc::new(InMemorySubmissionSink::new())
    } else {
        Arc::new(HttpSubmissionSink::from_env()?)
    };

    let mut runner = TestSessionRunner::new(
        args.session_id,
        questions.clone(),
        args.timing,
        sink,
        Clock::system(),
    )?;

    if let Some(secs) = args.timing.duration_secs() {
        println!("Timed session: {} minutes {} seconds.", secs / 60, secs % 60);
    }
    println!("Type `help` for commands.");
    print_question(&questions, 0);

    let (commands_tx, mut commands_rx) = mpsc::channel(32);
    let (events_tx, events_rx) = mpsc::channel(64);
    let reader = tokio::spawn(read_commands(commands_tx));
    let printer = tokio::spawn(print_events(events_rx, questions));

    let outcome = drive(&SessionDriver::default(), &mut runner, &mut commands_rx, &events_tx).await;
    drop(events_tx);
    reader.abort();
    let _ = printer.await;

    match outcome {
        Ok(summary) => {
            print_summary(&summary);
            if args.print_snapshot {
                println!("{}", serde_json::to_string_pretty(&runner.snapshot())?);
            }
            Ok(())
        }
        Err(DriverError::CommandsClosed) if runner.status() == SessionStatus::Submitting => {
            // The answers never reached the server; keep them on screen.
            println!("Left before the submission went through. Your answers:");
            println!("{}", serde_json::to_string_pretty(&runner.snapshot())?);
            Ok(())
        }
        Err(DriverError::CommandsClosed) => {
            println!("Left the session without submitting.");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Run the driver until the session completes or the student leaves.
///
/// When forced submission gives up, the session stays `Submitting` with its
/// payload kept, so the driver is started again and `submit` re-sends it.
async fn drive(
    driver: &SessionDriver,
    runner: &mut TestSessionRunner,
    commands: &mut mpsc::Receiver<SessionCommand>,
    events: &mpsc::Sender<SessionEvent>,
) -> Result<CompletionSummary, DriverError> {
    loop {
        match driver.run(runner, commands, events).await {
            Err(DriverError::AutoSubmitExhausted { attempts, source }) => {
                tracing::warn!(attempts, error = %source, "auto-submit gave up, waiting for the student");
                println!();
                println!("Time is up, but submitting failed {attempts} times ({source}).");
                println!("Your answers are kept. Type `submit` to try again.");
            }
            outcome => return outcome,
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let code = match run().await {
        Ok(()) => 0,
        Err(err) => {
            // At this layer (binary glue), printing once is fine.
            eprintln!("{err}");
            2
        }
    };
    // A pending stdin read would otherwise hold up runtime shutdown.
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, ArgsError> {
        let mut iter = args.iter().map(|s| (*s).to_string());
        Args::parse(&mut iter)
    }

    #[test]
    fn parses_timed_offline_session() {
        let args = parse(&["--questions", "qs.json", "--duration", "90", "--offline"]).unwrap();
        assert_eq!(args.questions, PathBuf::from("qs.json"));
        assert_eq!(args.timing, TimingMode::Timed { duration_secs: 90 });
        assert!(args.offline);
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = parse(&["--questions", "qs.json", "--duration", "0"]).unwrap_err();
        assert!(matches!(err, ArgsError::InvalidDuration { .. }));
    }

    #[test]
    fn flag_without_value_is_rejected() {
        let err = parse(&["--questions"]).unwrap_err();
        assert!(matches!(err, ArgsError::MissingValue { flag: "--questions" }));
    }

    #[tokio::test]
    async fn submit_after_exhausted_auto_submit_completes_session() {
        use services::{DriverConfig, TransportError};
        use std::time::Duration;
        use testprep_core::model::QuestionId;

        let sink = InMemorySubmissionSink::new();
        sink.fail_next(TransportError::Timeout);
        sink.fail_next(TransportError::HttpStatus(502));
        let questions = vec![Question::choice(QuestionId::new(1), "2 + 2?", ["3", "4"]).unwrap()];
        let mut runner = TestSessionRunner::new(
            SessionId::new(9),
            questions,
            TimingMode::timed(1).unwrap(),
            Arc::new(sink.clone()),
            Clock::system(),
        )
        .unwrap();
        let driver = SessionDriver::new(DriverConfig {
            tick_period: Duration::from_millis(5),
            auto_submit_retry_delay: Duration::from_millis(1),
            max_auto_submit_attempts: 2,
        });
        let (commands_tx, mut commands_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(64);

        // Ask for a retry once both forced attempts have failed.
        tokio::spawn(async move {
            let mut failures = 0;
            while let Some(event) = events_rx.recv().await {
                if matches!(event, SessionEvent::SubmitFailed(_)) {
                    failures += 1;
                    if failures == 2 {
                        let _ = commands_tx.send(SessionCommand::Submit).await;
                    }
                }
            }
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            drive(&driver, &mut runner, &mut commands_rx, &events_tx),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(summary.session_id, SessionId::new(9));
        assert_eq!(runner.status(), SessionStatus::Completed);
        let calls = sink.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|payload| payload == &calls[0]));
    }

    #[test]
    fn loads_question_file() {
        let path = std::env::temp_dir().join(format!("testprep-questions-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[{"id": 1, "prompt": "2 + 2?", "options": ["3", "4"]}, {"id": 2, "prompt": "Why?"}]"#,
        )
        .unwrap();

        let questions = load_questions(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(questions.len(), 2);
        assert!(questions[1].options().is_none());
    }
}
