use movie_index_bot::user_manager::{Role, UserManager, UserManagerError};

use super::test_utils::{TestAssertions, TestUserBuilder, TEST_CHANNEL_ID};
use super::TestDatabase;

#[tokio::test]
async fn test_terms_gate_and_roles() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let user_manager = UserManager::new(db.pool.clone(), vec![1]);

    TestUserBuilder::new(100)
        .username("viewer")
        .create(&user_manager)
        .await
        .expect("Failed to create user");
    assert!(!user_manager.has_accepted_terms(100).await.unwrap());

    user_manager.accept_terms(100).await.unwrap();
    assert!(user_manager.has_accepted_terms(100).await.unwrap());

    // accepting for an unknown user is an error, not a silent no-op
    assert!(matches!(
        user_manager.accept_terms(555).await,
        Err(UserManagerError::UserNotFound(555))
    ));

    // env admins are admins without a row
    assert!(user_manager.is_admin(1).await.unwrap());
    assert!(!user_manager.is_admin(100).await.unwrap());

    user_manager.set_role(100, Role::Admin).await.unwrap();
    assert!(user_manager.is_admin(100).await.unwrap());

    user_manager.set_role(100, Role::Banned).await.unwrap();
    assert!(user_manager.is_banned(100).await.unwrap());
    assert!(!user_manager.is_admin(100).await.unwrap());
    assert_eq!(user_manager.list_by_role(Role::Banned).await.unwrap().len(), 1);

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_eligible_recipients_skip_banned_and_unaccepted() {
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
    TestUserBuilder::new(13).create(&user_manager).await.unwrap();
    user_manager.set_role(12, Role::Banned).await.unwrap();

    let recipients = user_manager.eligible_recipients().await.unwrap();
    assert_eq!(recipients, vec![10, 11]);

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_search_history_and_username_lookup() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let user_manager = UserManager::new(db.pool.clone(), vec![]);
    TestUserBuilder::new(200)
        .username("Cinephile")
        .create(&user_manager)
        .await
        .unwrap();

    for query in ["inception", "matrix", "dune"] {
        user_manager.record_search(200, query).await.unwrap();
    }
    let history = user_manager.search_history(200, 2).await.unwrap();
    let queries: Vec<&str> = history.iter().map(|entry| entry.query.as_str()).collect();
    assert_eq!(queries, vec!["dune", "matrix"]);

    let found = user_manager.find_by_username("@cinephile").await.unwrap();
    assert_eq!(found.map(|user| user.telegram_user_id), Some(200));

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_history_buttons_survive_new_searches() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let user_manager = UserManager::new(db.pool.clone(), vec![]);
    TestUserBuilder::new(210).create(&user_manager).await.unwrap();
    TestUserBuilder::new(211).create(&user_manager).await.unwrap();

    for query in ["c", "b", "a"] {
        user_manager.record_search(210, query).await.unwrap();
    }
    // the keyboard shown to the user: [a, b, c]
    let shown = user_manager.search_history(210, 20).await.unwrap();
    let ids: Vec<i32> = shown.iter().map(|entry| entry.id).collect();

    // tapping "b" records a new search before the next tap
    let first = user_manager.history_query(210, ids[1]).await.unwrap();
    assert_eq!(first.as_deref(), Some("b"));
    user_manager.record_search(210, "b").await.unwrap();

    let second = user_manager.history_query(210, ids[2]).await.unwrap();
    assert_eq!(second.as_deref(), Some("c"));

    // rows of another user are not reachable
    assert_eq!(user_manager.history_query(211, ids[0]).await.unwrap(), None);

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_downloads_preferences_and_audit_log() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let user_manager = UserManager::new(db.pool.clone(), vec![]);
    TestUserBuilder::new(300).create(&user_manager).await.unwrap();

    user_manager.record_download(300, TEST_CHANNEL_ID, 5).await.unwrap();
    user_manager.record_bulk_download(300, 4).await.unwrap();
    TestAssertions::assert_download_count(&db, 300, 5).await.unwrap();

    user_manager.increment_inline_searches(300).await.unwrap();
    let user = user_manager.get_user(300).await.unwrap().unwrap();
    assert_eq!(user.inline_search_count, 1);

    user_manager.set_preference(300, "quality", "1080p").await.unwrap();
    let prefs = user_manager.preferences(300).await.unwrap();
    assert_eq!(prefs.get("quality").and_then(|v| v.as_str()), Some("1080p"));
    assert!(matches!(
        user_manager.set_preference(300, "theme", "dark").await,
        Err(UserManagerError::InvalidPreference(_))
    ));

    user_manager
        .log_action("user_promoted", Some(1), Some(300), None)
        .await;
    TestAssertions::assert_action_logged(&db, "user_promoted")
        .await
        .unwrap();

    db.cleanup().await.expect("Failed to cleanup test database");
}
