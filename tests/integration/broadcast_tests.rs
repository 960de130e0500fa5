use movie_index_bot::broadcast::{record_broadcast, BroadcastEngine};
use movie_index_bot::user_manager::{Role, UserManager};

use super::mock_bot::MockTelegramBot;
use super::test_utils::{TestUserBuilder, TEST_ADMIN_ID};
use super::TestDatabase;

#[tokio::test]
async fn test_broadcast_tallies_failures() {
    let bot = MockTelegramBot::new();
    bot.block(2);
    bot.remove_chat(4);

    let engine = BroadcastEngine::new(1000.0, 2);
    let summary = engine.run(&bot, &[1, 2, 3, 4, 5], "<b>News</b>").await;

    assert_eq!(summary.total, 5);
    assert_eq!(summary.sent, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.errors.get("blocked"), Some(&1));
    assert_eq!(summary.errors.get("invalid"), Some(&1));

    let delivered: Vec<i64> = bot.get_sent_messages().iter().map(|m| m.chat_id).collect();
    assert_eq!(delivered, vec![1, 3, 5]);
    assert_eq!(bot.get_messages_for_chat(1)[0].text, "<b>News</b>");
    assert!(bot.progress_count() >= 2);
}

#[tokio::test]
async fn test_broadcast_to_eligible_users_is_recorded() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let user_manager = UserManager::new(db.pool.clone(), vec![]);
    for id in [10, 11, 12] {
        TestUserBuilder::new(id)
            .accepted_terms()
            .create(&user_manager)
            .await
            .unwrap();
    }
    user_manager.set_role(12, Role::Banned).await.unwrap();

    let recipients = user_manager.eligible_recipients().await.unwrap();
    let bot = MockTelegramBot::new();
    bot.block(11);
    let summary = BroadcastEngine::new(1000.0, 10)
        .run(&bot, &recipients, "Hello")
        .await;
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 1);

    let broadcast_id = record_broadcast(&db.pool, TEST_ADMIN_ID, Some("admin"), "Hello", &summary)
        .await
        .unwrap();
    assert_eq!(broadcast_id, summary.broadcast_id());

    let client = db.pool.get().await.unwrap();
    let row = client
        .query_one(
            "SELECT total_users, sent_count, failed_count, error_breakdown FROM broadcasts WHERE broadcast_id = $1",
            &[&broadcast_id],
        )
        .await
        .unwrap();
    assert_eq!(row.get::<_, i32>(0), 2);
    assert_eq!(row.get::<_, i32>(1), 1);
    assert_eq!(row.get::<_, i32>(2), 1);
    let breakdown: serde_json::Value = row.get(3);
    assert_eq!(breakdown["blocked"], 1);

    // a second run logged within the same second keeps its own audit row
    let second_id = record_broadcast(&db.pool, TEST_ADMIN_ID, None, "Hello again", &summary)
        .await
        .unwrap();
    assert_eq!(second_id, format!("{}_2", broadcast_id));
    let count: i64 = client
        .query_one("SELECT COUNT(*) FROM broadcasts", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 2);

    db.cleanup().await.expect("Failed to cleanup test database");
}
