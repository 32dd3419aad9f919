/// Guided results conversation.
///
/// States advance strictly in order:
/// regulation, year, semester, result option, roll number (+ confirm), date of birth
/// (+ confirm), then `Done`. `Cancelled` is reachable from anywhere. Rejecting a
/// confirmation goes back to the matching collection state and keeps every other field.
///
/// Each state accepts one input shape (a button token from its own set, or free text
/// for roll number and date of birth). Anything else is ignored. Out-of-contract
/// selections (stale or missing option list) cancel the session with a restart hint.
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::messenger::{Button, ChatId, Keyboard, Messenger};
use crate::model::{CacheKey, RenderResult, RenderTarget};
use crate::render::RenderChain;
use crate::resolver::Resolver;

const YEARS: [u8; 4] = [1, 2, 3, 4];
const SEMESTERS: [u8; 2] = [1, 2];

const RESTART_HINT: &str = "Please start over with /resultscheck.";
const PHOTO_FAILED: &str = "Sorry, the result image could not be sent. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitingRegulation,
    AwaitingYear,
    AwaitingSemester,
    AwaitingDepartmentOrOption,
    AwaitingRoll,
    AwaitingRollConfirm,
    AwaitingDob,
    AwaitingDobConfirm,
    Done,
    Cancelled,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Cancelled)
    }
}

/// Everything collected so far. Fields fill in order as states advance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedFields {
    pub regulation: Option<String>,
    pub year: Option<u8>,
    pub semester: Option<u8>,
    pub option_index: Option<usize>,
    /// Display text of the chosen option
    pub department: Option<String>,
    pub resolved_target: Option<String>,
    pub roll_number: Option<String>,
    pub date_of_birth: Option<String>,
}

impl CollectedFields {
    pub fn cache_key(&self) -> Option<CacheKey> {
        Some(CacheKey::new(self.regulation.clone()?, self.year?, self.semester?))
    }

    /// The render target, only once every required field is present.
    pub fn render_target(&self) -> Option<RenderTarget> {
        self.cache_key()?;
        self.option_index?;
        Some(RenderTarget {
            link: self.resolved_target.clone()?,
            selected_option: self.department.clone(),
            roll_number: self.roll_number.clone()?,
            date_of_birth: self.date_of_birth.clone()?,
        })
    }
}

/// One user's in-flight results check.
#[derive(Debug)]
pub struct Session {
    chat: ChatId,
    state: State,
    fields: CollectedFields,
    /// Labels of the options shown; selection is by position in this list.
    pending_options: Option<Vec<String>>,
}

impl Session {
    pub fn new(chat: ChatId) -> Self {
        Self {
            chat,
            state: State::AwaitingRegulation,
            fields: CollectedFields::default(),
            pending_options: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn fields(&self) -> &CollectedFields {
        &self.fields
    }

    fn finish(&mut self, state: State) {
        debug!(chat = %self.chat, from = ?self.state, to = ?state, "session finished");
        self.state = state;
        self.fields = CollectedFields::default();
        self.pending_options = None;
    }

    fn advance(&mut self, state: State) {
        debug!(chat = %self.chat, from = ?self.state, to = ?state, "session transition");
        self.state = state;
    }
}

/// Input a session can receive once started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Button(String),
    Text(String),
}

/// Drives sessions through their states, calling the resolver when the semester is
/// chosen and the rendering chain once all details are confirmed.
pub struct Conversation {
    resolver: Arc<Resolver>,
    chain: Arc<RenderChain>,
    messenger: Arc<dyn Messenger>,
    regulations: Vec<String>,
}

impl Conversation {
    pub fn new(
        resolver: Arc<Resolver>,
        chain: Arc<RenderChain>,
        messenger: Arc<dyn Messenger>,
        regulations: Vec<String>,
    ) -> Self {
        Self {
            resolver,
            chain,
            messenger,
            regulations,
        }
    }

    /// Open a fresh session and ask for the regulation.
    pub async fn start(&self, chat: ChatId) -> Session {
        let session = Session::new(chat);
        let row = self
            .regulations
            .iter()
            .map(|r| Button::new(r, format!("reg_{r}")))
            .collect();
        self.send(
            chat,
            "Hi! Let's get your results.\n\nPlease select your Regulation:",
            Some(vec![row]),
        )
        .await;
        session
    }

    /// Explicit cancellation. Touches neither the resolver nor the rendering chain.
    pub async fn cancel(&self, session: &mut Session) {
        session.finish(State::Cancelled);
        self.send(
            session.chat,
            "Results check cancelled. Type /resultscheck to begin again.",
            None,
        )
        .await;
    }

    /// Feed one input to the session. Input of the wrong shape for the current state
    /// is dropped without a transition.
    pub async fn handle(&self, session: &mut Session, input: Input) {
        match (session.state, input) {
            (State::AwaitingRegulation, Input::Button(token)) => {
                self.on_regulation(session, &token).await
            }
            (State::AwaitingYear, Input::Button(token)) => self.on_year(session, &token).await,
            (State::AwaitingSemester, Input::Button(token)) => {
                self.on_semester(session, &token).await
            }
            (State::AwaitingDepartmentOrOption, Input::Button(token)) => {
                self.on_option(session, &token).await
            }
            (State::AwaitingRoll, Input::Text(text)) => self.on_roll(session, &text).await,
            (State::AwaitingRollConfirm, Input::Button(token)) => {
                self.on_roll_confirm(session, &token).await
            }
            (State::AwaitingDob, Input::Text(text)) => self.on_dob(session, &text).await,
            (State::AwaitingDobConfirm, Input::Button(token)) => {
                self.on_dob_confirm(session, &token).await
            }
            (state, input) => {
                debug!(chat = %session.chat, ?state, ?input, "input does not fit state, ignored");
            }
        }
    }

    async fn on_regulation(&self, session: &mut Session, token: &str) {
        let Some(regulation) = token
            .strip_prefix("reg_")
            .filter(|r| self.regulations.iter().any(|known| known.as_str() == *r))
        else {
            return;
        };
        session.fields.regulation = Some(regulation.to_string());
        session.advance(State::AwaitingYear);

        let keyboard = YEARS
            .chunks(2)
            .map(|pair| {
                pair.iter()
                    .map(|y| Button::new(y.to_string(), format!("year_{y}")))
                    .collect()
            })
            .collect();
        self.edit(
            session.chat,
            &format!("Regulation: {regulation}\n\nPlease select your Year:"),
            Some(keyboard),
        )
        .await;
    }

    async fn on_year(&self, session: &mut Session, token: &str) {
        let Some(year) = parse_choice(token, "year_", &YEARS) else {
            return;
        };
        session.fields.year = Some(year);
        session.advance(State::AwaitingSemester);

        let row = SEMESTERS
            .iter()
            .map(|s| Button::new(format!("Semester {s}"), format!("sem_{s}")))
            .collect();
        let text = format!(
            "Regulation: {}\nYear: {year}\n\nPlease select your Semester:",
            session.fields.regulation.as_deref().unwrap_or_default()
        );
        self.edit(session.chat, &text, Some(vec![row])).await;
    }

    async fn on_semester(&self, session: &mut Session, token: &str) {
        let Some(semester) = parse_choice(token, "sem_", &SEMESTERS) else {
            return;
        };
        session.fields.semester = Some(semester);
        let Some(key) = session.fields.cache_key() else {
            return self.abort(session, "An error occurred (missing selections).").await;
        };

        let options = self.resolver.list_options(&key).await;
        let summary = format!(
            "Selections complete:\nRegulation: {}\nYear: {}\nSemester: {}",
            key.regulation, key.year, key.semester
        );
        if options.is_empty() {
            info!(chat = %session.chat, %key, "no results for selection");
            session.finish(State::Cancelled);
            let text = format!(
                "{summary}\n\nSorry, no result links were found for these options. {RESTART_HINT}"
            );
            return self.edit(session.chat, &text, None).await;
        }

        let keyboard: Keyboard = options
            .iter()
            .enumerate()
            .map(|(i, label)| vec![Button::new(label, format!("opt_{i}"))])
            .collect();
        session.pending_options = Some(options);
        session.advance(State::AwaitingDepartmentOrOption);
        self.edit(
            session.chat,
            &format!("{summary}\n\nPlease choose your result:"),
            Some(keyboard),
        )
        .await;
    }

    async fn on_option(&self, session: &mut Session, token: &str) {
        let Some(digits) = token
            .strip_prefix("opt_")
            .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
        else {
            return;
        };
        let Some(options) = session.pending_options.clone() else {
            warn!(chat = %session.chat, "option pressed with no option list");
            return self.abort(session, "An error occurred (missing context).").await;
        };
        let Some((index, label)) = digits
            .parse::<usize>()
            .ok()
            .and_then(|i| options.get(i).map(|e| (i, e)))
        else {
            warn!(
                chat = %session.chat,
                token,
                available = options.len(),
                "option index out of range"
            );
            return self.abort(session, "An error occurred (invalid index).").await;
        };
        let Some(key) = session.fields.cache_key() else {
            return self.abort(session, "An error occurred (missing selections).").await;
        };
        let Some(link) = self.resolver.resolve_selection(&key, index).await else {
            return self.abort(session, "An error occurred (result not found).").await;
        };

        info!(chat = %session.chat, index, option = %label, "result option selected");
        session.fields.option_index = Some(index);
        session.fields.department = Some(label.clone());
        session.fields.resolved_target = Some(link);
        session.pending_options = None;
        session.advance(State::AwaitingRoll);

        self.edit(session.chat, &format!("You selected: {label}"), None)
            .await;
        self.send(session.chat, "Great. Now, please enter your Roll Number:", None)
            .await;
    }

    async fn on_roll(&self, session: &mut Session, text: &str) {
        let roll = text.trim();
        if roll.is_empty() {
            return;
        }
        session.fields.roll_number = Some(roll.to_string());
        session.advance(State::AwaitingRollConfirm);
        self.send(
            session.chat,
            &format!("Roll entered: {roll}\nIs this correct?"),
            Some(confirm_keyboard("roll")),
        )
        .await;
    }

    async fn on_roll_confirm(&self, session: &mut Session, token: &str) {
        match parse_confirm(token, "roll") {
            Some(true) => {
                session.advance(State::AwaitingDob);
                let roll = session.fields.roll_number.clone().unwrap_or_default();
                self.edit(session.chat, &format!("Roll number {roll} confirmed."), None)
                    .await;
                self.send(
                    session.chat,
                    "Finally, please enter your Date of Birth (YYYY-MM-DD):",
                    None,
                )
                .await;
            }
            Some(false) => {
                session.fields.roll_number = None;
                session.advance(State::AwaitingRoll);
                self.edit(session.chat, "Okay, please enter your Roll Number again:", None)
                    .await;
            }
            None => {}
        }
    }

    async fn on_dob(&self, session: &mut Session, text: &str) {
        let dob = text.trim();
        if dob.is_empty() {
            return;
        }
        session.fields.date_of_birth = Some(dob.to_string());
        session.advance(State::AwaitingDobConfirm);
        self.send(
            session.chat,
            &format!("Date of Birth entered: {dob}\nIs this correct?"),
            Some(confirm_keyboard("dob")),
        )
        .await;
    }

    async fn on_dob_confirm(&self, session: &mut Session, token: &str) {
        match parse_confirm(token, "dob") {
            Some(true) => self.complete(session).await,
            Some(false) => {
                session.fields.date_of_birth = None;
                session.advance(State::AwaitingDob);
                self.edit(
                    session.chat,
                    "Okay, please enter your Date of Birth again (YYYY-MM-DD):",
                    None,
                )
                .await;
            }
            None => {}
        }
    }

    /// Terminal step: one render with every collected field, then the session is done
    /// whatever the outcome.
    async fn complete(&self, session: &mut Session) {
        let Some(target) = session.fields.render_target() else {
            return self.abort(session, "An error occurred (incomplete details).").await;
        };
        let chat = session.chat;
        session.finish(State::Done);

        self.edit(chat, &format!("Date of Birth {} confirmed.", target.date_of_birth), None)
            .await;
        self.send(chat, "All data collected!\n\nProcessing your request, please wait...", None)
            .await;

        match self.chain.render(&target).await {
            RenderResult::Screenshot(shot) => {
                info!(
                    %chat,
                    source = %shot.source,
                    bytes = shot.png.len(),
                    "sending result screenshot"
                );
                let sent = self
                    .messenger
                    .send_photo(chat, shot.png, "Here is your result.")
                    .await;
                if let Err(e) = sent {
                    warn!(%chat, error = %e, "failed to send result photo");
                    self.send(chat, PHOTO_FAILED, None).await;
                }
            }
            RenderResult::Text(text) => self.send(chat, &text, None).await,
            RenderResult::Error(message) => {
                self.send(
                    chat,
                    &format!(
                        "Sorry, an error occurred while processing your results: {message}. \
                         {RESTART_HINT}"
                    ),
                    None,
                )
                .await
            }
        }
    }

    /// Out-of-contract input: cancel and tell the user to start over.
    async fn abort(&self, session: &mut Session, reason: &str) {
        session.finish(State::Cancelled);
        self.edit(session.chat, &format!("{reason} {RESTART_HINT}"), None).await;
    }

    async fn send(&self, chat: ChatId, text: &str, keyboard: Option<Keyboard>) {
        if let Err(e) = self.messenger.send_text(chat, text, keyboard).await {
            warn!(%chat, error = %e, "failed to send message");
        }
    }

    async fn edit(&self, chat: ChatId, text: &str, keyboard: Option<Keyboard>) {
        if let Err(e) = self.messenger.edit_last(chat, text, keyboard).await {
            warn!(%chat, error = %e, "failed to edit message");
        }
    }
}

fn parse_choice(token: &str, prefix: &str, allowed: &[u8]) -> Option<u8> {
    token
        .strip_prefix(prefix)?
        .parse::<u8>()
        .ok()
        .filter(|v| allowed.contains(v))
}

fn parse_confirm(token: &str, field: &str) -> Option<bool> {
    match token.strip_prefix(field)? {
        "_ok" => Some(true),
        "_no" => Some(false),
        _ => None,
    }
}

fn confirm_keyboard(field: &str) -> Keyboard {
    vec![vec![
        Button::new("Yes", format!("{field}_ok")),
        Button::new("No", format!("{field}_no")),
    ]]
}
