use movie_index_bot::premium::{PremiumError, PremiumManager, DEFAULT_FEATURES, MAX_PREMIUM_DAYS};

use super::test_utils::TEST_ADMIN_ID;
use super::TestDatabase;

#[tokio::test]
async fn test_grant_extend_edit_remove() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let premium = PremiumManager::new(db.pool.clone());

    assert!(!premium.is_premium(100).await.unwrap());
    assert_eq!(premium.days_remaining(100).await.unwrap(), None);

    let first = premium.add_premium(100, 30, TEST_ADMIN_ID, Some("alice")).await.unwrap();
    assert!(premium.is_premium(100).await.unwrap());

    // extending a running subscription stacks on the current expiry
    let extended = premium.add_premium(100, 10, TEST_ADMIN_ID, None).await.unwrap();
    assert_eq!((extended - first).num_days(), 10);
    let record = premium.get_premium(100).await.unwrap().unwrap();
    assert_eq!(record.username.as_deref(), Some("alice"));
    assert_eq!(premium.days_remaining(100).await.unwrap(), Some(39));

    assert!(matches!(
        premium.add_premium(100, 0, TEST_ADMIN_ID, None).await,
        Err(PremiumError::InvalidDays(0))
    ));
    assert!(matches!(
        premium.edit_premium(100, 0, TEST_ADMIN_ID).await,
        Err(PremiumError::ZeroDelta)
    ));
    assert!(matches!(
        premium.add_premium(100, 1_000_000_000, TEST_ADMIN_ID, None).await,
        Err(PremiumError::InvalidDays(1_000_000_000))
    ));
    assert!(matches!(
        premium.edit_premium(100, -(MAX_PREMIUM_DAYS + 1), TEST_ADMIN_ID).await,
        Err(PremiumError::InvalidDays(_))
    ));
    assert!(matches!(
        premium.edit_premium(100, i64::MIN, TEST_ADMIN_ID).await,
        Err(PremiumError::InvalidDays(i64::MIN))
    ));
    assert_eq!(premium.days_remaining(100).await.unwrap(), Some(39));
    assert!(matches!(
        premium.edit_premium(555, 5, TEST_ADMIN_ID).await,
        Err(PremiumError::NotPremium(555))
    ));

    let shortened = premium.edit_premium(100, -5, TEST_ADMIN_ID).await.unwrap();
    assert_eq!((extended - shortened).num_days(), 5);

    // an edit never moves the expiry into the past
    premium.edit_premium(100, -1000, TEST_ADMIN_ID).await.unwrap();
    assert!(!premium.is_premium(100).await.unwrap());
    assert_eq!(premium.days_remaining(100).await.unwrap(), Some(0));

    premium.remove_premium(100).await.unwrap();
    assert!(matches!(
        premium.remove_premium(100).await,
        Err(PremiumError::NotPremium(100))
    ));

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_cleanup_expired() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let premium = PremiumManager::new(db.pool.clone());
    premium.add_premium(1, 7, TEST_ADMIN_ID, None).await.unwrap();

    let client = db.pool.get().await.unwrap();
    client
        .execute(
            "INSERT INTO premium_users (telegram_user_id, granted_by, expires_at)
             VALUES (2, $1, NOW() - INTERVAL '1 day')",
            &[&TEST_ADMIN_ID],
        )
        .await
        .unwrap();

    assert_eq!(premium.list_premium().await.unwrap().len(), 2);
    assert_eq!(premium.cleanup_expired().await.unwrap(), 1);
    let remaining = premium.list_premium().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].telegram_user_id, 1);

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_feature_gating() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let premium = PremiumManager::new(db.pool.clone());
    premium.seed_default_features().await.unwrap();
    // seeding twice keeps a single row per feature
    premium.seed_default_features().await.unwrap();

    let features = premium.list_features().await.unwrap();
    assert_eq!(features.len(), DEFAULT_FEATURES.len());
    assert!(features.iter().all(|f| !f.premium_only));

    assert!(premium.can_use_feature(100, "recent", false).await.unwrap());
    assert!(premium.toggle_feature("recent").await.unwrap());
    assert!(!premium.can_use_feature(100, "recent", false).await.unwrap());
    assert!(premium.can_use_feature(100, "recent", true).await.unwrap());

    premium.add_premium(100, 1, TEST_ADMIN_ID, None).await.unwrap();
    assert!(premium.can_use_feature(100, "recent", false).await.unwrap());

    // unknown features are open
    assert!(premium.can_use_feature(200, "no_such_feature", false).await.unwrap());
    assert!(matches!(
        premium.toggle_feature("no_such_feature").await,
        Err(PremiumError::FeatureNotFound(_))
    ));

    premium.add_feature("hd_only", "HD downloads", TEST_ADMIN_ID).await.unwrap();
    assert!(premium.is_feature_premium_only("hd_only").await.unwrap());
    assert!(matches!(
        premium.add_feature("hd_only", "again", TEST_ADMIN_ID).await,
        Err(PremiumError::FeatureExists(_))
    ));

    db.cleanup().await.expect("Failed to cleanup test database");
}
