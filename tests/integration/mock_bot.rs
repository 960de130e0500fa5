use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use movie_index_bot::broadcast::{BroadcastTransport, DeliveryError};

/// represents a sent message for verification in tests
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: String,
}

/// broadcast transport that records deliveries instead of calling telegram
#[derive(Debug, Clone, Default)]
pub struct MockTelegramBot {
    pub sent_messages: Arc<Mutex<Vec<SentMessage>>>,
    pub progress_reports: Arc<Mutex<Vec<String>>>,
    blocked: Arc<Mutex<HashSet<i64>>>,
    missing: Arc<Mutex<HashSet<i64>>>,
}

impl MockTelegramBot {
    pub fn new() -> Self {
        Self::default()
    }

    /// deliveries to this chat fail as if the user blocked the bot
    pub fn block(&self, chat_id: i64) {
        self.blocked.lock().unwrap().insert(chat_id);
    }

    /// deliveries to this chat fail as if the chat does not exist
    pub fn remove_chat(&self, chat_id: i64) {
        self.missing.lock().unwrap().insert(chat_id);
    }

    pub fn get_sent_messages(&self) -> Vec<SentMessage> {
        self.sent_messages.lock().unwrap().clone()
    }

    pub fn get_messages_for_chat(&self, chat_id: i64) -> Vec<SentMessage> {
        self.sent_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|msg| msg.chat_id == chat_id)
            .cloned()
            .collect()
    }

    pub fn progress_count(&self) -> usize {
        self.progress_reports.lock().unwrap().len()
    }
}

impl BroadcastTransport for MockTelegramBot {
    async fn deliver(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        if self.blocked.lock().unwrap().contains(&chat_id) {
            return Err(DeliveryError::Blocked);
        }
        if self.missing.lock().unwrap().contains(&chat_id) {
            return Err(DeliveryError::Invalid);
        }
        self.sent_messages.lock().unwrap().push(SentMessage {
            chat_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn report_progress(&self, text: &str) {
        self.progress_reports.lock().unwrap().push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_bot_basic_functionality() {
        let bot = MockTelegramBot::new();
        bot.block(456);

        assert!(bot.deliver(123, "Hello").await.is_ok());
        assert_eq!(bot.deliver(456, "Hello").await, Err(DeliveryError::Blocked));

        let messages = bot.get_sent_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].chat_id, 123);
        assert_eq!(messages[0].text, "Hello");
        assert!(bot.get_messages_for_chat(456).is_empty());
    }
}
