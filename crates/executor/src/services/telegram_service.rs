use common::config::BlogSettings;
use teloxide::prelude::*;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Telegram rejects longer texts.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Forwards blog messages to a Telegram chat.
pub struct TelegramService {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramService {
    pub fn new(settings: &BlogSettings) -> Self {
        Self {
            bot: Bot::new(settings.bot_token.clone()),
            chat_id: ChatId(settings.chat_id),
        }
    }

    pub async fn start(self, mut rx: broadcast::Receiver<String>) {
        info!(chat_id = self.chat_id.0, "Starting Telegram Notification Service");

        loop {
            match rx.recv().await {
                Ok(msg) => {
                    for part in split_message(&msg, MAX_MESSAGE_CHARS) {
                        if let Err(e) = self.bot.send_message(self.chat_id, part).await {
                            error!("Failed to send Telegram message: {}", e);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Telegram service lagged behind. Missed {} messages.", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Telegram notification channel closed. Stopping service.");
                    break;
                }
            }
        }
    }
}

/// Splits on char boundaries, preferring the last newline inside each chunk.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        let limit = rest.char_indices().nth(max_chars).map_or(rest.len(), |(i, _)| i);
        let cut = match rest[..limit].rfind('\n') {
            Some(newline) if newline > 0 => newline,
            _ => limit,
        };
        parts.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start_matches('\n');
    }
    if !rest.is_empty() || parts.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}
