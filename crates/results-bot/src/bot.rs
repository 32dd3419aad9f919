/// Routes inbound chat events to commands, the exam timetable lookup and the per-chat
/// results sessions.
///
/// Each session sits behind its own async lock that is held for the whole handling of
/// one event, including the listing fetch or render it may await. A second event for
/// the same chat waits for the first; other chats are unaffected.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::conversation::{Conversation, Input, Session};
use crate::messenger::{Button, ChatId, Command, Inbound, Keyboard, Messenger};
use crate::timetable::{notices_message, TimetableService};

const HELP_TEXT: &str = "Welcome! I can help you with:\n\n\
    /examtimetable - Get exam timetables for your regulation\n\
    /resultscheck - Check your exam results\n\
    /cancel - Stop a results check in progress";

#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<ChatId, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get(&self, chat: ChatId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.get(&chat).cloned()
    }

    async fn insert(&self, chat: ChatId, session: Session) {
        let replaced = self
            .sessions
            .lock()
            .await
            .insert(chat, Arc::new(Mutex::new(session)));
        if replaced.is_some() {
            debug!(%chat, "previous session replaced");
        }
    }

    async fn remove(&self, chat: ChatId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.remove(&chat)
    }

    /// Drop `session` if it is still the one registered for `chat`.
    async fn remove_if_current(&self, chat: ChatId, session: &Arc<Mutex<Session>>) {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(&chat).is_some_and(|current| Arc::ptr_eq(current, session)) {
            sessions.remove(&chat);
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

pub struct ResultsBot {
    conversation: Conversation,
    timetable: TimetableService,
    messenger: Arc<dyn Messenger>,
    regulations: Vec<String>,
    sessions: SessionStore,
}

impl ResultsBot {
    pub fn new(
        conversation: Conversation,
        timetable: TimetableService,
        messenger: Arc<dyn Messenger>,
        regulations: Vec<String>,
    ) -> Self {
        Self {
            conversation,
            timetable,
            messenger,
            regulations,
            sessions: SessionStore::new(),
        }
    }

    pub async fn handle(&self, chat: ChatId, event: Inbound) {
        match event {
            Inbound::Command(Command::Start) => self.send(chat, HELP_TEXT, None).await,
            Inbound::Command(Command::ResultsCheck) => {
                let active = self.sessions.len().await;
                info!(%chat, active, "results check started");
                let session = self.conversation.start(chat).await;
                self.sessions.insert(chat, session).await;
            }
            Inbound::Command(Command::Cancel) => self.cancel(chat).await,
            Inbound::Command(Command::ExamTimetable) => {
                let row = self
                    .regulations
                    .iter()
                    .map(|r| Button::new(r, format!("tt_{r}")))
                    .collect();
                self.send(chat, "Select your regulation for the exam timetable:", Some(vec![row]))
                    .await;
            }
            Inbound::Button(token) => match token.strip_prefix("tt_") {
                Some(regulation) => self.timetable(chat, regulation).await,
                None => self.dispatch(chat, Input::Button(token)).await,
            },
            Inbound::Text(text) => self.dispatch(chat, Input::Text(text)).await,
            Inbound::UnknownCommand(command) => {
                debug!(%chat, %command, "unknown command");
                self.send(chat, "Unknown command. Type /start to see what I can do.", None)
                    .await;
            }
        }
    }

    async fn dispatch(&self, chat: ChatId, input: Input) {
        let Some(entry) = self.sessions.get(chat).await else {
            debug!(%chat, ?input, "no session, input ignored");
            if matches!(input, Input::Text(_)) {
                self.send(chat, "Type /resultscheck to check your results.", None).await;
            }
            return;
        };

        let mut session = entry.lock().await;
        self.conversation.handle(&mut session, input).await;
        if session.state().is_terminal() {
            drop(session);
            self.sessions.remove_if_current(chat, &entry).await;
        }
    }

    async fn cancel(&self, chat: ChatId) {
        let Some(entry) = self.sessions.remove(chat).await else {
            self.send(chat, "No results check in progress. Type /resultscheck to begin.", None)
                .await;
            return;
        };
        let mut session = entry.lock().await;
        if session.state().is_terminal() {
            return;
        }
        info!(
            %chat,
            state = ?session.state(),
            regulation = ?session.fields().regulation,
            "results check cancelled"
        );
        self.conversation.cancel(&mut session).await;
    }

    async fn timetable(&self, chat: ChatId, regulation: &str) {
        if !self.regulations.iter().any(|r| r == regulation) {
            debug!(%chat, regulation, "unknown timetable regulation ignored");
            return;
        }
        self.edit(chat, &format!("Fetching exam timetables for {regulation}..."))
            .await;
        let notices = self.timetable.notices(regulation).await;
        self.edit(chat, &notices_message(regulation, &notices)).await;
    }

    async fn send(&self, chat: ChatId, text: &str, keyboard: Option<Keyboard>) {
        if let Err(e) = self.messenger.send_text(chat, text, keyboard).await {
            warn!(%chat, error = %e, "failed to send message");
        }
    }

    async fn edit(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.messenger.edit_last(chat, text, None).await {
            warn!(%chat, error = %e, "failed to edit message");
        }
    }
}
