use movie_index_bot::requests::{RequestError, RequestManager, MAX_PENDING_REQUESTS_PER_USER};

use super::test_utils::TEST_ADMIN_ID;
use super::TestDatabase;

#[tokio::test]
async fn test_submit_and_queue_position() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let requests = RequestManager::new(db.pool.clone());

    let (first, position) = requests
        .submit(100, Some("alice"), "Inception", Some(2010), Some("https://www.imdb.com/title/tt1375666/"))
        .await
        .expect("Failed to submit request");
    assert_eq!(position, 1);
    assert_eq!(first.display_title(), "Inception (2010)");
    assert_eq!(first.status, "pending");

    let (_, position) = requests
        .submit(101, None, "The Matrix", Some(1999), None)
        .await
        .unwrap();
    assert_eq!(position, 2);

    // one request per user per day
    assert!(matches!(
        requests.submit(100, Some("alice"), "Dune", Some(2021), None).await,
        Err(RequestError::DailyLimit(_))
    ));

    // a near-identical pending title is reported as a duplicate
    match requests.submit(102, None, "inception", Some(2010), None).await {
        Err(RequestError::Duplicate(existing)) => assert_eq!(existing.id, first.id),
        other => panic!("expected duplicate, got {:?}", other.map(|(r, _)| r.id)),
    }

    assert!(matches!(
        requests.submit(103, None, "Dune", None, Some("not a link")).await,
        Err(RequestError::InvalidImdbLink)
    ));

    assert_eq!(requests.list_pending().await.unwrap().len(), 2);
    assert_eq!(requests.user_request_count(100).await.unwrap(), 1);

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_pending_limit() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let requests = RequestManager::new(db.pool.clone());
    let client = db.pool.get().await.unwrap();
    for i in 0..MAX_PENDING_REQUESTS_PER_USER {
        client
            .execute(
                "INSERT INTO requests (telegram_user_id, title, request_date) VALUES ($1, $2, NOW() - INTERVAL '3 days')",
                &[&200i64, &format!("Old request {}", i)],
            )
            .await
            .unwrap();
    }

    assert!(matches!(
        requests.check_limits(200).await,
        Err(RequestError::PendingLimit(n)) if n == MAX_PENDING_REQUESTS_PER_USER
    ));
    assert!(requests.check_limits(201).await.is_ok());

    db.cleanup().await.expect("Failed to cleanup test database");
}

#[tokio::test]
async fn test_complete_requests() {
    let Some(db) = TestDatabase::create_fresh().await else {
        return;
    };
    let requests = RequestManager::new(db.pool.clone());
    let (first, _) = requests.submit(300, None, "Inception", Some(2010), None).await.unwrap();
    requests.submit(301, None, "The Matrix", Some(1999), None).await.unwrap();
    requests.submit(302, None, "Dune", Some(2021), None).await.unwrap();

    let done = requests.complete(first.id, TEST_ADMIN_ID).await.unwrap();
    assert_eq!(done.status, "completed");
    assert_eq!(done.telegram_user_id, 300);

    // completing twice reports the request as gone
    assert!(matches!(
        requests.complete(first.id, TEST_ADMIN_ID).await,
        Err(RequestError::NotFound(id)) if id == first.id
    ));
    assert_eq!(requests.queue_position(300).await.unwrap(), None);
    assert_eq!(requests.queue_position(302).await.unwrap(), Some(2));

    let rest = requests.complete_all(TEST_ADMIN_ID).await.unwrap();
    assert_eq!(rest.len(), 2);
    assert!(requests.list_pending().await.unwrap().is_empty());

    db.cleanup().await.expect("Failed to cleanup test database");
}
