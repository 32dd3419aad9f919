/// Telegram transport: long polling through teloxide, mapped onto the core's
/// `Inbound` events and `Messenger` trait.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, Message,
    MessageId, Update,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bot::ResultsBot;
use crate::error::AppError;
use crate::messenger::{self, Inbound, Keyboard, Messenger, MessagingError};

pub struct TelegramMessenger {
    bot: Bot,
    /// Most recent message sent per chat, the target of `edit_last`.
    last_sent: Mutex<HashMap<messenger::ChatId, MessageId>>,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    async fn remember(&self, chat: messenger::ChatId, message: &Message) {
        self.last_sent.lock().await.insert(chat, message.id);
    }
}

fn markup(keyboard: Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.into_iter().map(|row| {
        row.into_iter()
            .map(|button| InlineKeyboardButton::callback(button.label, button.token))
    }))
}

fn transport(e: teloxide::RequestError) -> MessagingError {
    MessagingError::Transport(e.to_string())
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(
        &self,
        chat: messenger::ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), MessagingError> {
        let mut request = self.bot.send_message(ChatId(chat.0), text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(markup(keyboard));
        }
        let sent = request.await.map_err(transport)?;
        self.remember(chat, &sent).await;
        Ok(())
    }

    /// Falls back to a new message when there is nothing to edit or Telegram refuses
    /// the edit (message too old, deleted).
    async fn edit_last(
        &self,
        chat: messenger::ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), MessagingError> {
        let last = self.last_sent.lock().await.get(&chat).copied();
        let Some(message_id) = last else {
            let reason = MessagingError::NothingToEdit(chat);
            debug!(%chat, error = %reason, "sending instead of editing");
            return self.send_text(chat, text, keyboard).await;
        };

        let mut request = self.bot.edit_message_text(ChatId(chat.0), message_id, text);
        if let Some(keyboard) = keyboard.clone() {
            request = request.reply_markup(markup(keyboard));
        }
        match request.await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(%chat, error = %e, "edit failed, sending a new message");
                self.send_text(chat, text, keyboard).await
            }
        }
    }

    async fn send_photo(
        &self,
        chat: messenger::ChatId,
        png: Vec<u8>,
        caption: &str,
    ) -> Result<(), MessagingError> {
        let sent = self
            .bot
            .send_photo(ChatId(chat.0), InputFile::memory(png).file_name("result.png"))
            .caption(caption)
            .await
            .map_err(transport)?;
        self.remember(chat, &sent).await;
        Ok(())
    }
}

async fn on_message(msg: Message, core: Arc<ResultsBot>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        debug!(chat = %msg.chat.id, "non-text message ignored");
        return Ok(());
    };
    let chat = messenger::ChatId(msg.chat.id.0);
    core.handle(chat, Inbound::from_text(text)).await;
    Ok(())
}

async fn on_callback(bot: Bot, q: CallbackQuery, core: Arc<ResultsBot>) -> ResponseResult<()> {
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!(error = %e, "failed to answer callback query");
    }
    let Some(data) = q.data else {
        return Ok(());
    };
    // Private chats only: the chat id equals the user id.
    let chat = messenger::ChatId(q.from.id.0 as i64);
    core.handle(chat, Inbound::Button(data)).await;
    Ok(())
}

/// Validate the token, then poll for updates until interrupted.
pub async fn run(bot: Bot, core: Arc<ResultsBot>) -> Result<(), AppError> {
    let me = bot
        .get_me()
        .await
        .map_err(|e| AppError::Telegram(e.to_string()))?;
    info!(username = ?me.user.username, "telegram bot authenticated, polling for updates");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![core])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("telegram dispatcher stopped");
    Ok(())
}
