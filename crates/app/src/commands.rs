use std::fmt;

use services::SessionCommand;

/// One line typed by the student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(SessionCommand),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    Empty,
    MissingArgument { command: &'static str },
    InvalidQuestionNumber { raw: String },
    Unknown(String),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::Empty => write!(f, "type a command, or `help`"),
            InputError::MissingArgument { command } => write!(f, "`{command}` needs an argument"),
            InputError::InvalidQuestionNumber { raw } => {
                write!(f, "question numbers start at 1, got {raw:?}")
            }
            InputError::Unknown(raw) => write!(f, "unknown command: {raw}"),
        }
    }
}

impl std::error::Error for InputError {}

pub const HELP: &str = "\
Commands:
  n, next            go to the next question
  p, prev            go to the previous question
  g, goto <number>   jump to a question (1-based)
  a, answer <text>   answer the current question
  f, flag            flag or unflag the current question
  pause | resume     pause or resume the timer
  submit             submit all answers
  status             show how many questions are answered and flagged
  help               show this help
  q, quit            leave without submitting";

/// Parse a line of input.
///
/// # Errors
///
/// Returns `InputError` for empty, unknown or incomplete commands.
pub fn parse_line(line: &str) -> Result<Input, InputError> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let command = match head.to_ascii_lowercase().as_str() {
        "" => return Err(InputError::Empty),
        "n" | "next" => SessionCommand::Next,
        "p" | "prev" | "previous" => SessionCommand::Previous,
        "g" | "goto" => {
            if rest.is_empty() {
                return Err(InputError::MissingArgument { command: "goto" });
            }
            let number: usize = rest
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| InputError::InvalidQuestionNumber {
                    raw: rest.to_string(),
                })?;
            SessionCommand::Navigate(number - 1)
        }
        "a" | "answer" => {
            if rest.is_empty() {
                return Err(InputError::MissingArgument { command: "answer" });
            }
            SessionCommand::Answer(rest.to_string())
        }
        "f" | "flag" => SessionCommand::ToggleFlag,
        "pause" => SessionCommand::Pause,
        "resume" => SessionCommand::Resume,
        "submit" => SessionCommand::Submit,
        "s" | "status" => SessionCommand::Status,
        "help" | "?" => return Ok(Input::Help),
        "q" | "quit" | "exit" => return Ok(Input::Quit),
        _ => return Err(InputError::Unknown(line.to_string())),
    };
    Ok(Input::Command(command))
}
