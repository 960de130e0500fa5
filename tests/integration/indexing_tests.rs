use chrono::{Duration, Utc};

use movie_index_bot::auto_delete::{DeletionScheduler, BULK_POLICY, SINGLE_FILE_POLICY};
use movie_index_bot::channel_monitor::{ChannelMonitor, IndexOutcome, MediaInfo};
use movie_index_bot::metadata_parser::ContentType;
use movie_index_bot::recent::{format_recent, group_recent};
use movie_index_bot::search::SearchEngine;

use super::test_utils::{video_post, TestAssertions, TestScenario, TEST_ADMIN_ID, TEST_CHANNEL_ID};
use super::TestDatabase;

const CAPTIONS: &[&str] = &[
    "Inception 2010 1080p BluRay",
    "Inception 2010 720p WEB-DL",
    "Breaking Bad S02E05 720p WEB-DL",
    "The Matrix 1999 2160p WEBRip",
];

#[tokio::test]
async fn test_index_channel_posts() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let monitor = ChannelMonitor::new(db.pool.clone(), true);

    // posts from channels nobody registered are ignored
    let outcome = monitor.index_post(&video_post(1, "Dune 2021 2160p")).await.unwrap();
    assert_eq!(outcome, IndexOutcome::NotMonitored);

    let outcomes = TestScenario::index_channel(&monitor, CAPTIONS).await.unwrap();
    assert!(outcomes.iter().all(|o| *o == IndexOutcome::Indexed));
    TestAssertions::assert_movie_count(&db, 4).await.unwrap();

    let entry = monitor.get_entry(TEST_CHANNEL_ID, 3).await.unwrap().unwrap();
    assert_eq!(entry.title, "Breaking Bad");
    assert_eq!(entry.metadata.content_type, ContentType::Series);
    assert_eq!(entry.metadata.season, Some(2));
    assert_eq!(entry.metadata.episode, Some(5));

    // the same message again is a duplicate and leaves the table alone
    let again = monitor.index_post(&video_post(1, CAPTIONS[0])).await.unwrap();
    assert_eq!(again, IndexOutcome::Duplicate);

    // non-video documents are skipped
    let pdf = MediaInfo {
        channel_id: TEST_CHANNEL_ID,
        message_id: 50,
        file_name: Some("poster.pdf".to_string()),
        mime_type: Some("application/pdf".to_string()),
        ..Default::default()
    };
    assert_eq!(monitor.index_post(&pdf).await.unwrap(), IndexOutcome::NotMedia);

    let stats = monitor.indexing_stats().await.unwrap();
    assert_eq!(stats.total_attempts, 5);
    assert_eq!(stats.successful_inserts, 4);
    assert_eq!(stats.duplicate_errors, 1);
    assert_eq!(stats.other_errors, 0);

    monitor.reset_indexing_stats().await.unwrap();
    assert_eq!(monitor.indexing_stats().await.unwrap().total_attempts, 0);

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_channel_management_and_auto_indexing_toggle() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let monitor = ChannelMonitor::new(db.pool.clone(), true);

    assert!(monitor.add_channel(TEST_CHANNEL_ID, Some("Test Movies"), TEST_ADMIN_ID).await.unwrap());
    assert!(!monitor.add_channel(TEST_CHANNEL_ID, None, TEST_ADMIN_ID).await.unwrap());
    assert_eq!(monitor.list_channels().await.unwrap().len(), 1);

    assert!(!monitor.toggle_auto_indexing().await.unwrap());
    let outcome = monitor.index_post(&video_post(1, CAPTIONS[0])).await.unwrap();
    assert_eq!(outcome, IndexOutcome::AutoIndexingOff);
    assert!(monitor.toggle_auto_indexing().await.unwrap());

    monitor.index_post(&video_post(1, CAPTIONS[0])).await.unwrap();
    let stats = monitor.channel_stats().await.unwrap();
    assert_eq!(stats[0].1, 1);

    // removing a channel keeps its files, resetting it drops them
    assert!(monitor.remove_channel(TEST_CHANNEL_ID).await.unwrap());
    assert!(!monitor.remove_channel(TEST_CHANNEL_ID).await.unwrap());
    assert_eq!(monitor.total_indexed().await.unwrap(), 1);
    assert_eq!(monitor.reset_channel(TEST_CHANNEL_ID).await.unwrap(), 1);
    assert_eq!(monitor.total_indexed().await.unwrap(), 0);

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_search_modes() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let monitor = ChannelMonitor::new(db.pool.clone(), true);
    TestScenario::index_channel(&monitor, CAPTIONS).await.unwrap();
    let engine = SearchEngine::new(db.pool.clone(), 68);

    let hits = engine.perform_search("incep", false).await.unwrap();
    let exact_hits: Vec<_> = hits.iter().filter(|hit| hit.fuzzy_score.is_none()).collect();
    assert_eq!(exact_hits.len(), 2);
    assert!(exact_hits.iter().all(|hit| hit.entry.title == "Inception"));

    let exact = engine.perform_search("the matrix", true).await.unwrap();
    assert_eq!(exact.len(), 1);
    assert!(engine.perform_search("matrix", true).await.unwrap().is_empty());

    // misspellings fall back to fuzzy matching
    let fuzzy = engine.perform_search("incepton", false).await.unwrap();
    assert!(!fuzzy.is_empty());
    assert_eq!(fuzzy[0].entry.title, "Inception");
    assert!(fuzzy[0].fuzzy_score.is_some());

    let inline = engine.inline_search("breaking").await.unwrap();
    assert_eq!(inline[0].entry.title, "Breaking Bad");

    let best = engine.best_match("matrix").await.unwrap().unwrap();
    assert_eq!(best.metadata.year, Some(1999));

    assert!(engine.perform_search("   ", false).await.unwrap().is_empty());

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_recent_groups_latest_uploads() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let monitor = ChannelMonitor::new(db.pool.clone(), true);
    TestScenario::index_channel(&monitor, CAPTIONS).await.unwrap();
    let engine = SearchEngine::new(db.pool.clone(), 68);

    let entries = engine.recent(100).await.unwrap();
    assert_eq!(entries.len(), 4);
    let content = group_recent(&entries);
    assert_eq!(content.total_files, 4);
    assert_eq!(content.movies.len(), 2);
    assert_eq!(content.series.len(), 1);

    let text = format_recent(&content);
    assert!(text.contains("Inception"));
    assert!(text.contains("S02(E05)"));

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_scheduled_deletions() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let scheduler = DeletionScheduler::new(db.pool.clone());

    let single = scheduler.schedule(100, 10, SINGLE_FILE_POLICY).await.unwrap();
    scheduler.schedule(100, 11, BULK_POLICY).await.unwrap();
    assert_eq!(scheduler.pending_count().await.unwrap(), 2);

    let now = Utc::now();
    assert!(scheduler.due_warnings(now).await.unwrap().is_empty());

    // four minutes in, only the single file is inside its warning window
    let warnings = scheduler.due_warnings(now + Duration::minutes(4)).await.unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message_id, 10);
    assert_eq!(warnings[0].warning_minutes(), 2);
    scheduler.mark_notified(warnings[0].id).await.unwrap();
    assert!(scheduler
        .due_warnings(now + Duration::minutes(4))
        .await
        .unwrap()
        .is_empty());

    let due = scheduler.due_deletions(single + Duration::seconds(1)).await.unwrap();
    assert_eq!(due.len(), 1);
    scheduler.remove(due[0].id).await.unwrap();
    assert_eq!(scheduler.pending_count().await.unwrap(), 1);

    db.cleanup().await.expect("Failed to cleanup test database");
}
