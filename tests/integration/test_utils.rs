use movie_index_bot::channel_monitor::{ChannelMonitor, IndexOutcome, MediaInfo};
use movie_index_bot::user_manager::{User, UserManager};

use super::TestDatabase;

pub const TEST_CHANNEL_ID: i64 = -1001234567890;
pub const TEST_ADMIN_ID: i64 = 999;

/// helper struct for creating test users with predictable IDs
pub struct TestUserBuilder {
    telegram_user_id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    accept_terms: bool,
}

impl TestUserBuilder {
    pub fn new(telegram_user_id: i64) -> Self {
        Self {
            telegram_user_id,
            username: None,
            first_name: None,
            last_name: None,
            accept_terms: false,
        }
    }

    pub fn username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn first_name(mut self, first_name: &str) -> Self {
        self.first_name = Some(first_name.to_string());
        self
    }

    pub fn last_name(mut self, last_name: &str) -> Self {
        self.last_name = Some(last_name.to_string());
        self
    }

    pub fn accepted_terms(mut self) -> Self {
        self.accept_terms = true;
        self
    }

    pub async fn create(&self, user_manager: &UserManager) -> Result<User, Box<dyn std::error::Error + Send + Sync>> {
        let user = user_manager
            .get_or_create_user(
                self.telegram_user_id,
                self.username.as_deref(),
                self.first_name.as_deref(),
                self.last_name.as_deref(),
            )
            .await?;
        if self.accept_terms {
            user_manager.accept_terms(self.telegram_user_id).await?;
        }
        Ok(user)
    }
}

/// a channel post carrying a video document
pub fn video_post(message_id: i32, caption: &str) -> MediaInfo {
    MediaInfo {
        channel_id: TEST_CHANNEL_ID,
        message_id,
        channel_title: Some("Test Movies".to_string()),
        caption: Some(caption.to_string()),
        file_name: Some(format!("{}.mkv", caption.replace(' ', "."))),
        mime_type: Some("video/x-matroska".to_string()),
        file_size: Some(1_500_000_000),
        is_video: false,
    }
}

/// utility functions for test assertions
pub struct TestAssertions;

impl TestAssertions {
    pub async fn assert_movie_count(
        db: &TestDatabase,
        expected_count: i64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = db.pool.get().await?;
        let row = client.query_one("SELECT COUNT(*) FROM movies", &[]).await?;
        let actual_count: i64 = row.get(0);
        assert_eq!(
            actual_count, expected_count,
            "Expected {} indexed movies, but found {}",
            expected_count, actual_count
        );
        Ok(())
    }

    pub async fn assert_download_count(
        db: &TestDatabase,
        telegram_user_id: i64,
        expected_count: i32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = db.pool.get().await?;
        let row = client
            .query_one(
                "SELECT download_count FROM users WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?;
        let actual_count: i32 = row.get(0);
        assert_eq!(
            actual_count, expected_count,
            "Expected user {} to have {} downloads, but found {}",
            telegram_user_id, expected_count, actual_count
        );
        Ok(())
    }

    pub async fn assert_action_logged(
        db: &TestDatabase,
        action: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = db.pool.get().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM action_logs WHERE action = $1", &[&action])
            .await?;
        let count: i64 = row.get(0);
        assert!(count > 0, "Expected action '{}' to be logged", action);
        Ok(())
    }
}

/// helper for creating test scenarios
pub struct TestScenario;

impl TestScenario {
    /// registers the test channel and indexes the given captions as consecutive posts
    pub async fn index_channel(
        monitor: &ChannelMonitor,
        captions: &[&str],
    ) -> Result<Vec<IndexOutcome>, Box<dyn std::error::Error + Send + Sync>> {
        monitor
            .add_channel(TEST_CHANNEL_ID, Some("Test Movies"), TEST_ADMIN_ID)
            .await?;

        let mut outcomes = Vec::new();
        for (i, caption) in captions.iter().enumerate() {
            outcomes.push(monitor.index_post(&video_post(i as i32 + 1, caption)).await?);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_builder() {
        let Some(db) = TestDatabase::create_fresh().await else {
            return;
        };
        let user_manager = UserManager::new(db.pool.clone(), vec![]);

        let user = TestUserBuilder::new(12345)
            .username("testuser")
            .first_name("Test")
            .last_name("User")
            .accepted_terms()
            .create(&user_manager)
            .await
            .expect("Failed to create user");

        assert_eq!(user.telegram_user_id, 12345);
        assert_eq!(user.username, Some("testuser".to_string()));
        assert_eq!(user.first_name, Some("Test".to_string()));
        assert_eq!(user.last_name, Some("User".to_string()));
        assert!(user_manager.has_accepted_terms(12345).await.unwrap());

        db.cleanup().await.expect("Failed to cleanup test database");
    }

    #[test]
    fn test_video_post_is_indexable() {
        let post = video_post(1, "Inception 2010 1080p");
        assert_eq!(post.file_name.as_deref(), Some("Inception.2010.1080p.mkv"));
        assert!(post.is_indexable());
    }
}
