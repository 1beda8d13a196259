mod common;

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use common::{Harness, ADULT_PRICE, CHILD_PRICE};
use tourline_booking::ReservationRequest;
use tourline_core::clock::Clock;
use tourline_core::repository::BookingStore;
use tourline_core::CoreError;
use tourline_shared::{Booking, BookingStatus, ExpiryPolicy, SeatCount};
use uuid::Uuid;

#[tokio::test]
async fn test_reserve_prices_and_holds_seats() {
    let h = Harness::new();
    let dep = h.departure(10).await;

    let booking = h.reserve(dep.id, 2, 1).await.unwrap();

    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.total_amount, 2 * ADULT_PRICE + CHILD_PRICE);
    assert_eq!(booking.expires_at, Some(h.clock.now() + Duration::seconds(600)));
    assert_eq!(h.available(dep.id).await, 7);

    let cached = h.store.get_departure(dep.id).await.unwrap().unwrap();
    assert_eq!(cached.seats_remaining, Some(7));
}

#[tokio::test]
async fn test_last_seat_then_capacity_exceeded() {
    let h = Harness::new();
    let dep = h.departure(10).await;

    h.reserve(dep.id, 10, 0).await.unwrap();
    let err = h.reserve(dep.id, 1, 0).await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::CapacityExceeded {
            requested: 1,
            available: 0
        }
    ));
    assert_eq!(h.available(dep.id).await, 0);
}

#[tokio::test]
async fn test_reserve_rejects_bad_requests() {
    let h = Harness::new();
    let dep = h.departure(10).await;

    let err = h.reserve(Uuid::new_v4(), 1, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));

    let err = h.reserve(dep.id, 0, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));

    let err = h.reserve(dep.id, 2, -1).await.unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));

    let err = h
        .ledger
        .reserve(&ReservationRequest {
            customer_id: "  ".to_string(),
            departure_id: dep.id,
            seats: SeatCount::new(1, 0),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));

    assert_eq!(h.available(dep.id).await, 10);
}

#[tokio::test]
async fn test_reserve_rejected_once_departure_started() {
    let h = Harness::new();
    let dep = h.departure(10).await;
    h.clock.set(
        NaiveDate::from_ymd_opt(2030, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
            .and_utc(),
    );

    let err = h.reserve(dep.id, 1, 0).await.unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
}

#[tokio::test]
async fn test_cancel_releases_seats_and_repeats_quietly() {
    let h = Harness::new();
    let dep = h.departure(4).await;
    let booking = h.reserve(dep.id, 3, 0).await.unwrap();

    let cancelled = h.ledger.cancel(booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(h.available(dep.id).await, 4);

    let again = h.ledger.cancel(booking.id).await.unwrap();
    assert_eq!(again.status, BookingStatus::Cancelled);
    assert_eq!(again.updated_at, cancelled.updated_at);
}

#[tokio::test]
async fn test_cancel_paid_booking_is_invalid_transition() {
    let h = Harness::new();
    let dep = h.departure(4).await;
    let booking = h.reserve(dep.id, 1, 0).await.unwrap();
    h.orchestrator.confirm_manual(booking.id, "CASH").await.unwrap();

    let err = h.ledger.cancel(booking.id).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidTransition {
            from: BookingStatus::Paid,
            to: BookingStatus::Cancelled
        }
    ));
    assert_eq!(h.available(dep.id).await, 3);
}

#[tokio::test]
async fn test_cancel_unknown_booking_not_found() {
    let h = Harness::new();
    let err = h.ledger.cancel(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_reaper_expires_elapsed_hold_and_frees_seats() {
    let h = Harness::new();
    let dep = h.departure(10).await;
    let booking = h.reserve(dep.id, 3, 0).await.unwrap();
    assert_eq!(h.available(dep.id).await, 7);

    h.clock.advance(Duration::seconds(601));
    // Time alone already releases the seats.
    assert_eq!(h.available(dep.id).await, 10);

    let report = h.reaper.run_cycle().await;
    assert_eq!(report.examined, 1);
    assert_eq!(report.expired, 1);
    assert_eq!(report.seats_released, 3);
    assert_eq!(report.departures_refreshed, 1);

    let expired = h.ledger.get(booking.id).await.unwrap();
    assert_eq!(expired.status, BookingStatus::Expired);
    assert!(expired.expires_at.is_none());
    let cached = h.store.get_departure(dep.id).await.unwrap().unwrap();
    assert_eq!(cached.seats_remaining, Some(10));
}

#[tokio::test]
async fn test_reaper_only_touches_due_holds() {
    let h = Harness::new();
    let dep = h.departure(10).await;
    let now = h.clock.now();
    let policy = ExpiryPolicy::default();

    let mut overdue = Booking::new_hold("a".to_string(), dep.id, SeatCount::new(1, 0), ADULT_PRICE, now, &policy);
    overdue.expires_at = Some(now - Duration::seconds(1));
    let mut fresh = Booking::new_hold("b".to_string(), dep.id, SeatCount::new(1, 0), ADULT_PRICE, now, &policy);
    fresh.expires_at = Some(now + Duration::hours(1));
    h.store.seed_booking(overdue.clone()).await;
    h.store.seed_booking(fresh.clone()).await;

    let report = h.reaper.run_cycle().await;
    assert_eq!(report.expired, 1);

    assert_eq!(h.ledger.get(overdue.id).await.unwrap().status, BookingStatus::Expired);
    let untouched = h.ledger.get(fresh.id).await.unwrap();
    assert_eq!(untouched, fresh);
}

#[tokio::test]
async fn test_legacy_hold_without_deadline_expires_by_window() {
    let h = Harness::new();
    let dep = h.departure(5).await;
    let now = h.clock.now();

    let mut legacy = Booking::new_hold(
        "legacy".to_string(),
        dep.id,
        SeatCount::new(2, 0),
        2 * ADULT_PRICE,
        now,
        &ExpiryPolicy::default(),
    );
    legacy.expires_at = None;
    h.store.seed_booking(legacy.clone()).await;

    assert_eq!(h.available(dep.id).await, 3);
    assert_eq!(h.reaper.run_cycle().await.expired, 0);

    h.clock.advance(Duration::seconds(600));
    assert_eq!(h.available(dep.id).await, 5);
    let report = h.reaper.run_cycle().await;
    assert_eq!(report.expired, 1);
    assert_eq!(report.seats_released, 2);
    assert_eq!(h.ledger.get(legacy.id).await.unwrap().status, BookingStatus::Expired);
}

#[tokio::test]
async fn test_reaper_survives_store_outage() {
    let h = Harness::new();
    let dep = h.departure(5).await;
    let booking = h.reserve(dep.id, 1, 0).await.unwrap();
    h.clock.advance(Duration::minutes(30));

    h.store.set_offline(true);
    let report = h.reaper.run_cycle().await;
    assert_eq!(report, Default::default());

    h.store.set_offline(false);
    assert_eq!(h.reaper.run_cycle().await.expired, 1);
    assert_eq!(h.ledger.get(booking.id).await.unwrap().status, BookingStatus::Expired);
}

#[tokio::test]
async fn test_expire_leaves_paid_and_fresh_bookings_alone() {
    let h = Harness::new();
    let dep = h.departure(5).await;
    let paid = h.reserve(dep.id, 1, 0).await.unwrap();
    h.orchestrator.confirm_manual(paid.id, "BANK_TRANSFER").await.unwrap();
    let fresh = h.reserve(dep.id, 1, 0).await.unwrap();

    assert!(!h.ledger.expire(fresh.id).await.unwrap());
    h.clock.advance(Duration::hours(2));
    assert!(!h.ledger.expire(paid.id).await.unwrap());
    assert!(h.ledger.expire(fresh.id).await.unwrap());

    assert_eq!(h.ledger.get(paid.id).await.unwrap().status, BookingStatus::Paid);
    assert_eq!(h.available(dep.id).await, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_oversell() {
    let h = Arc::new(Harness::new());
    let dep = h.departure(7).await;

    let mut handles = Vec::new();
    for i in 0..50 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.ledger
                .reserve(&ReservationRequest {
                    customer_id: format!("customer-{}", i),
                    departure_id: dep.id,
                    seats: SeatCount::new(1, 0),
                })
                .await
        }));
    }

    let mut held = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => held += 1,
            Err(CoreError::CapacityExceeded { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(held, 7);
    assert_eq!(h.available(dep.id).await, 0);
    assert_eq!(h.store.bookings_holding_seats(dep.id).await.unwrap().len(), 7);
}
