use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::{debug, warn};

use common::Notifier;

/// Sends notifications to one Telegram chat.
///
/// A single `Bot` is shared by every user's notifier; each notifier only
/// knows its own chat id.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self { bot, chat_id: ChatId(chat_id) }
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id.0
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> bool {
        match self.bot.send_message(self.chat_id, message).await {
            Ok(_) => {
                debug!(chat_id = self.chat_id.0, "Telegram notification sent");
                true
            }
            Err(e) => {
                warn!(chat_id = self.chat_id.0, error = %e, "Failed to send Telegram notification");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifiers_share_one_bot() {
        let bot = Bot::new("123456:TEST");
        let alice = TelegramNotifier::new(bot.clone(), 11);
        let bob = TelegramNotifier::new(bot, -1001);
        assert_eq!(alice.chat_id(), 11);
        assert_eq!(bob.chat_id(), -1001);
    }
}
