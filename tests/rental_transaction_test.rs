mod common;

use std::sync::Arc;
use std::time::Duration;

use book_rental_ddd::adapters::memory::RemoteStateStore as InMemoryStore;
use book_rental_ddd::application::rental::{DenialReason, RentalError, RentalTransactionManager};
use book_rental_ddd::config::RentalSettings;
use book_rental_ddd::domain::commands::RentalRequest;
use book_rental_ddd::domain::rental::{self, RentalPricing};
use book_rental_ddd::domain::value_objects::{BookRef, Isbn13, UserId};
use book_rental_ddd::domain::{RentalStatus, RentalValidationError};
use book_rental_ddd::ports::RemoteStateStore;
use chrono::{NaiveDate, TimeZone, Utc};

use common::{ISBN, OTHER_ISBN, fast_settings};

// ============================================================================
// ヘルパー
// ============================================================================

fn setup() -> (Arc<InMemoryStore>, RentalTransactionManager) {
    let store = Arc::new(InMemoryStore::new());
    let manager = RentalTransactionManager::new(store.clone(), fast_settings());
    (store, manager)
}

fn request(user: &str, isbn: &str) -> RentalRequest {
    RentalRequest::new(
        UserId::new(user),
        BookRef::new(Isbn13::new(isbn), "Crime and Punishment"),
        Utc::now(),
        10,
        "Rent",
    )
}

// ============================================================================
// 正常系
// ============================================================================

#[tokio::test]
async fn test_rent_activates_with_ten_day_window() {
    let (store, manager) = setup();
    let requested_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    let req = RentalRequest::new(
        UserId::new("u1"),
        BookRef::new(Isbn13::new(ISBN), "Crime and Punishment"),
        requested_at,
        10,
        "Rent",
    );

    let record = manager.rent(req).await.unwrap();

    assert_eq!(record.status, RentalStatus::Active);
    assert_eq!(record.start_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    assert_eq!(record.due_date, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
    assert_eq!(record.fee.cents(), 100);
    assert_eq!(record.label, "Rent");

    let stored = store.rentals_for(&UserId::new("u1"), &Isbn13::new(ISBN));
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, RentalStatus::Active);
    // Pending と Active の2回
    assert_eq!(store.rental_write_attempts(), 2);
    assert!(!manager.guard().is_pending(&UserId::new("u1"), &Isbn13::new(ISBN)));
}

#[tokio::test]
async fn test_second_rent_after_success_is_duplicate() {
    let (store, manager) = setup();

    let first = manager.rent(request("u1", ISBN)).await.unwrap();
    let second = manager.rent(request("u1", ISBN)).await;

    match second {
        Err(RentalError::DuplicateRental {
            reason: DenialReason::AlreadyRented(id),
        }) => assert_eq!(id, first.id),
        other => panic!("expected duplicate rental, got {:?}", other),
    }
    assert_eq!(store.rentals().len(), 1);
}

#[tokio::test]
async fn test_concurrent_rents_produce_single_record() {
    let (store, manager) = setup();
    store.set_latency(Duration::from_millis(20));

    let (a, b) = tokio::join!(
        manager.rent(request("u1", ISBN)),
        manager.rent(request("u1", ISBN))
    );

    let results = [a, b];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(RentalError::DuplicateRental { .. })))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(duplicates, 1);

    let stored = store.rentals_for(&UserId::new("u1"), &Isbn13::new(ISBN));
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, RentalStatus::Active);
}

#[tokio::test]
async fn test_different_books_rent_independently() {
    let (store, manager) = setup();

    let (a, b) = tokio::join!(
        manager.rent(request("u1", ISBN)),
        manager.rent(request("u1", OTHER_ISBN))
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(store.rentals().len(), 2);
}

// ============================================================================
// 再試行と冪等性
// ============================================================================

#[tokio::test]
async fn test_transient_write_failures_are_retried() {
    let (store, manager) = setup();
    store.fail_next_rental_writes(2);

    let record = manager.rent(request("u1", ISBN)).await.unwrap();

    assert_eq!(record.status, RentalStatus::Active);
    assert_eq!(store.rental_write_attempts(), 4);
    assert_eq!(store.rentals().len(), 1);
}

#[tokio::test]
async fn test_lost_ack_retry_does_not_duplicate() {
    let (store, manager) = setup();
    // 書き込みは適用されたが応答が失われる
    store.lose_next_rental_acks(1);

    let record = manager.rent(request("u1", ISBN)).await.unwrap();

    let stored = store.rentals_for(&UserId::new("u1"), &Isbn13::new(ISBN));
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, record.id);
    assert_eq!(stored[0].status, RentalStatus::Active);
}

#[tokio::test]
async fn test_exhausted_retries_mark_rental_failed() {
    let (store, manager) = setup();
    store.fail_next_rental_writes(3);

    let result = manager.rent(request("u1", ISBN)).await;

    let rental_id = match result {
        Err(RentalError::RemoteWrite { rental_id, .. }) => rental_id,
        other => panic!("expected remote write error, got {:?}", other),
    };
    let stored = store.rentals();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, rental_id);
    assert_eq!(stored[0].status, RentalStatus::Failed);

    // 失敗後はガードが解除され、再申請できる
    let user = UserId::new("u1");
    let isbn = Isbn13::new(ISBN);
    assert!(!manager.guard().is_pending(&user, &isbn));
    let retried = manager.rent(request("u1", ISBN)).await.unwrap();
    assert_eq!(retried.status, RentalStatus::Active);
    assert_ne!(retried.id, rental_id);
}

#[tokio::test]
async fn test_failed_activation_marks_rental_failed() {
    let (store, manager) = setup();
    // Pending の書き込みは成功し、Active への遷移が再試行の上限まで失敗する
    store.fail_rental_writes_after(1, 3);

    let result = manager.rent(request("u1", ISBN)).await;

    let rental_id = match result {
        Err(RentalError::RemoteWrite { rental_id, .. }) => rental_id,
        other => panic!("expected remote write error, got {:?}", other),
    };
    let stored = store.rentals_for(&UserId::new("u1"), &Isbn13::new(ISBN));
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, rental_id);
    assert_eq!(stored[0].status, RentalStatus::Failed);
    // Pending 1回 + Active 3回 + Failed 1回
    assert_eq!(store.rental_write_attempts(), 5);
    assert!(!manager.guard().is_pending(&UserId::new("u1"), &Isbn13::new(ISBN)));

    let retried = manager.rent(request("u1", ISBN)).await.unwrap();
    assert_eq!(retried.status, RentalStatus::Active);
}

#[tokio::test]
async fn test_existence_check_failure_denies_rental() {
    let (store, manager) = setup();
    store.fail_next_reads(1);

    let result = manager.rent(request("u1", ISBN)).await;

    assert!(matches!(
        result,
        Err(RentalError::DuplicateRental {
            reason: DenialReason::CheckFailed
        })
    ));
    assert_eq!(store.rental_write_attempts(), 0);
}

// ============================================================================
// 取り消しと放棄
// ============================================================================

#[tokio::test]
async fn test_dropped_caller_does_not_abort_transaction() {
    let (store, manager) = setup();
    store.set_latency(Duration::from_millis(30));

    let abandoned =
        tokio::time::timeout(Duration::from_millis(5), manager.rent(request("u1", ISBN))).await;
    assert!(abandoned.is_err());

    // バックグラウンドの取引が終端状態に達するのを待つ
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stored = store.rentals_for(&UserId::new("u1"), &Isbn13::new(ISBN));
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, RentalStatus::Active);
    assert!(!manager.guard().is_pending(&UserId::new("u1"), &Isbn13::new(ISBN)));
}

#[tokio::test]
async fn test_slow_rental_keeps_blocking_past_pending_timeout() {
    let store = Arc::new(InMemoryStore::new());
    let manager = RentalTransactionManager::new(
        store.clone(),
        RentalSettings {
            pending_timeout: Duration::from_millis(20),
            initial_backoff: Duration::from_millis(150),
            max_backoff: Duration::from_millis(150),
            ..RentalSettings::default()
        },
    );
    store.set_latency(Duration::from_millis(10));
    // 最初の書き込みが失敗し、バックオフの間に pending_timeout を超える
    store.fail_next_rental_writes(1);

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.rent(request("u1", ISBN)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = manager.rent(request("u1", ISBN)).await;

    assert!(matches!(
        second,
        Err(RentalError::DuplicateRental {
            reason: DenialReason::InFlight
        })
    ));
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status, RentalStatus::Active);

    let stored = store.rentals_for(&UserId::new("u1"), &Isbn13::new(ISBN));
    let active = stored
        .iter()
        .filter(|r| r.status == RentalStatus::Active)
        .count();
    assert_eq!(stored.len(), 1);
    assert_eq!(active, 1);
}

#[tokio::test]
async fn test_stale_pending_record_does_not_block() {
    let (store, manager) = setup();
    let old = RentalRequest::new(
        UserId::new("u1"),
        BookRef::new(Isbn13::new(ISBN), "Crime and Punishment"),
        Utc::now() - chrono::Duration::minutes(30),
        10,
        "Rent",
    );
    let abandoned = rental::open_rental(&old, &RentalPricing::default()).unwrap();
    store.insert_rental(abandoned);

    let record = manager.rent(request("u1", ISBN)).await.unwrap();

    assert_eq!(record.status, RentalStatus::Active);
}

#[tokio::test]
async fn test_recent_pending_record_blocks() {
    let (store, manager) = setup();
    let recent = rental::open_rental(&request("u1", ISBN), &RentalPricing::default()).unwrap();
    store.insert_rental(recent.clone());

    let result = manager.rent(request("u1", ISBN)).await;

    assert!(matches!(
        result,
        Err(RentalError::DuplicateRental {
            reason: DenialReason::AlreadyRented(id)
        }) if id == recent.id
    ));
}

#[tokio::test]
async fn test_terminal_record_is_not_overwritten() {
    let store = InMemoryStore::new();
    let pending = rental::open_rental(&request("u1", ISBN), &RentalPricing::default()).unwrap();
    let active = rental::activate(&pending, Utc::now()).unwrap();
    let failed = rental::fail(&pending, Utc::now()).unwrap();

    store
        .write_rental(&active, &active.idempotency_key())
        .await
        .unwrap();
    store
        .write_rental(&failed, &failed.idempotency_key())
        .await
        .unwrap();

    let stored = store.rentals();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, RentalStatus::Active);
}

// ============================================================================
// 入力検証
// ============================================================================

#[tokio::test]
async fn test_empty_isbn_is_rejected_without_remote_calls() {
    let (store, manager) = setup();

    let result = manager.rent(request("u1", "")).await;

    assert!(matches!(
        result,
        Err(RentalError::Validation(RentalValidationError::EmptyIsbn))
    ));
    assert_eq!(store.rental_write_attempts(), 0);
    assert!(store.rentals().is_empty());
}

#[tokio::test]
async fn test_empty_user_is_rejected() {
    let (_, manager) = setup();

    let result = manager.rent(request("  ", ISBN)).await;

    assert!(matches!(
        result,
        Err(RentalError::Validation(RentalValidationError::EmptyUserId))
    ));
}

#[tokio::test]
async fn test_non_positive_duration_is_rejected() {
    let (store, manager) = setup();
    let mut req = request("u1", ISBN);
    req.duration_days = 0;

    let result = manager.rent(req).await;

    assert!(matches!(result, Err(RentalError::Validation(_))));
    assert!(store.rentals().is_empty());
}
