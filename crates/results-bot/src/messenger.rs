/// The messaging side as the core sees it: outbound text, buttons, edits and photos,
/// and inbound commands, button presses and free text.
use std::fmt;

use async_trait::async_trait;

/// Chat a conversation takes place in. Private chats only, so this also identifies
/// the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single-select inline button. `token` comes back verbatim when pressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub token: String,
}

impl Button {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

/// Button rows, top to bottom.
pub type Keyboard = Vec<Vec<Button>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    ResultsCheck,
    ExamTimetable,
    Cancel,
}

impl Command {
    /// Parse `/name` or `/name@botname`, ignoring any arguments.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim().split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        match name.to_ascii_lowercase().as_str() {
            "start" | "help" => Some(Command::Start),
            "resultscheck" => Some(Command::ResultsCheck),
            "examtimetable" => Some(Command::ExamTimetable),
            "cancel" => Some(Command::Cancel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command(Command),
    /// A `/word` the bot does not know; never fed to a conversation as input.
    UnknownCommand(String),
    Button(String),
    Text(String),
}

impl Inbound {
    pub fn from_text(text: &str) -> Self {
        if !text.trim_start().starts_with('/') {
            return Inbound::Text(text.to_string());
        }
        match Command::parse(text) {
            Some(command) => Inbound::Command(command),
            None => Inbound::UnknownCommand(text.trim().to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("messaging transport failed: {0}")]
    Transport(String),

    #[error("no previous message to edit in chat {0}")]
    NothingToEdit(ChatId),
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), MessagingError>;

    /// Replace the most recently sent message in `chat`.
    async fn edit_last(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), MessagingError>;

    async fn send_photo(
        &self,
        chat: ChatId,
        png: Vec<u8>,
        caption: &str,
    ) -> Result<(), MessagingError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Sent {
        Text { text: String, keyboard: Option<Keyboard> },
        Edit { text: String, keyboard: Option<Keyboard> },
        Photo { png: Vec<u8>, caption: String },
    }

    impl Sent {
        pub(crate) fn text(&self) -> &str {
            match self {
                Sent::Text { text, .. } | Sent::Edit { text, .. } => text,
                Sent::Photo { caption, .. } => caption,
            }
        }

        pub(crate) fn tokens(&self) -> Vec<String> {
            match self {
                Sent::Text { keyboard, .. } | Sent::Edit { keyboard, .. } => keyboard
                    .iter()
                    .flatten()
                    .flatten()
                    .map(|b| b.token.clone())
                    .collect(),
                Sent::Photo { .. } => Vec::new(),
            }
        }
    }

    /// Records everything sent, per call order.
    #[derive(Default)]
    pub(crate) struct RecordingMessenger {
        pub sent: Mutex<Vec<Sent>>,
    }

    impl RecordingMessenger {
        pub(crate) fn last(&self) -> Sent {
            self.sent.lock().unwrap().last().cloned().expect("nothing sent")
        }

        pub(crate) fn all(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn send_text(
            &self,
            _chat: ChatId,
            text: &str,
            keyboard: Option<Keyboard>,
        ) -> Result<(), MessagingError> {
            self.sent.lock().unwrap().push(Sent::Text {
                text: text.to_string(),
                keyboard,
            });
            Ok(())
        }

        async fn edit_last(
            &self,
            _chat: ChatId,
            text: &str,
            keyboard: Option<Keyboard>,
        ) -> Result<(), MessagingError> {
            self.sent.lock().unwrap().push(Sent::Edit {
                text: text.to_string(),
                keyboard,
            });
            Ok(())
        }

        async fn send_photo(
            &self,
            _chat: ChatId,
            png: Vec<u8>,
            caption: &str,
        ) -> Result<(), MessagingError> {
            self.sent.lock().unwrap().push(Sent::Photo {
                png,
                caption: caption.to_string(),
            });
            Ok(())
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("/resultscheck"), Some(Command::ResultsCheck));
        assert_eq!(Command::parse("  /cancel now"), Some(Command::Cancel));
        assert_eq!(
            Command::parse("/ExamTimetable@mits_results_bot"),
            Some(Command::ExamTimetable)
        );
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/unknown"), None);
        assert_eq!(Command::parse("resultscheck"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn commands_and_text_are_told_apart() {
        assert_eq!(
            Inbound::from_text("/resultscheck"),
            Inbound::Command(Command::ResultsCheck)
        );
        assert_eq!(Inbound::from_text("21X51A0501"), Inbound::Text("21X51A0501".to_string()));
        assert_eq!(Inbound::from_text("14-05-2003"), Inbound::Text("14-05-2003".to_string()));
        assert_eq!(
            Inbound::from_text("/whatever"),
            Inbound::UnknownCommand("/whatever".to_string())
        );
    }
}
