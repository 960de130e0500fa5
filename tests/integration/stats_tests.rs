use movie_index_bot::channel_monitor::ChannelMonitor;
use movie_index_bot::premium::PremiumManager;
use movie_index_bot::requests::RequestManager;
use movie_index_bot::statistics::{export_csv, export_json, format_dashboard, StatisticsCollector};
use movie_index_bot::user_manager::{Role, UserManager};

use super::test_utils::{TestScenario, TestUserBuilder, TEST_ADMIN_ID};
use super::TestDatabase;

#[tokio::test]
async fn test_collect_on_empty_database() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let collector = StatisticsCollector::new(db.pool.clone());

    let stats = collector.collect().await.expect("Failed to collect statistics");
    assert_eq!(stats.total_users, 0);
    assert_eq!(stats.total_content, 0);
    assert!(stats.top_searches.is_empty());
    assert_eq!(stats.premium.total, 0);

    // empty data still renders
    assert!(!format_dashboard(&stats).is_empty());
    assert!(collector.collect_user(42).await.unwrap().is_none());

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_collect_counts_and_exports() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let user_manager = UserManager::new(db.pool.clone(), vec![]);
    let monitor = ChannelMonitor::new(db.pool.clone(), true);
    let requests = RequestManager::new(db.pool.clone());
    let premium = PremiumManager::new(db.pool.clone());

    for id in [1, 2, 3] {
        TestUserBuilder::new(id)
            .first_name("Viewer")
            .accepted_terms()
            .create(&user_manager)
            .await
            .unwrap();
    }
    user_manager.set_role(3, Role::Banned).await.unwrap();
    for query in ["Inception", "inception", "dune"] {
        user_manager.record_search(1, query).await.unwrap();
    }
    user_manager.record_download(1, -100, 1).await.unwrap();

    TestScenario::index_channel(
        &monitor,
        &["Inception 2010 1080p", "Dark S01E01 720p", "Dark S01E02 720p"],
    )
    .await
    .unwrap();
    requests.submit(1, None, "Dune", Some(2021), None).await.unwrap();
    premium.add_premium(2, 30, TEST_ADMIN_ID, None).await.unwrap();

    let collector = StatisticsCollector::new(db.pool.clone());
    let stats = collector.collect().await.unwrap();
    assert_eq!(stats.total_users, 3);
    assert_eq!(stats.banned_users, 1);
    assert_eq!(stats.premium_users, 1);
    assert_eq!(stats.total_content, 3);
    assert_eq!(stats.total_movies, 1);
    assert_eq!(stats.total_series, 2);
    assert_eq!(stats.enabled_channels, 1);
    assert_eq!(stats.pending_requests, 1);
    assert_eq!(stats.total_searches, 3);
    assert_eq!(stats.top_searches[0].label, "inception");
    assert_eq!(stats.top_searches[0].count, 2);
    assert_eq!(stats.indexing.successful_inserts, 3);

    let quick = collector.collect_quick().await.unwrap();
    assert_eq!(quick.total_users, 3);
    assert_eq!(quick.total_content, 3);

    let json: serde_json::Value = serde_json::from_str(&export_json(&stats).unwrap()).unwrap();
    assert_eq!(json["total_users"], 3);
    let csv = export_csv(&stats);
    assert!(csv.starts_with("Category,Metric,Value\n"));
    assert!(csv.contains("Users,Banned Users,1\n"));

    let user = collector.collect_user(1).await.unwrap().unwrap();
    assert_eq!(user.total_searches, 3);
    assert_eq!(user.unique_searches, 2);
    assert_eq!(user.total_downloads, 1);
    assert_eq!(user.total_requests, 1);
    assert_eq!(user.pending_requests, 1);

    db.cleanup().await.expect("Failed to cleanup test database");
}
