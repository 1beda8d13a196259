use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use tourline_catalog::{InventoryCalculator, PhaseRefresher};
use tourline_core::clock::{Clock, ManualClock};
use tourline_core::repository::BookingStore;
use tourline_core::CoreError;
use tourline_shared::{Booking, Departure, DeparturePhase, ExpiryPolicy, SeatCount};
use tourline_store::MemoryStore;
use uuid::Uuid;

fn departure(capacity: i32, start: (u32, u32), end: (u32, u32)) -> Departure {
    Departure {
        id: Uuid::new_v4(),
        tour_id: Uuid::new_v4(),
        start_date: NaiveDate::from_ymd_opt(2030, start.0, start.1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2030, end.0, end.1).unwrap(),
        capacity,
        adult_price: 1_000_000,
        child_price: 500_000,
        seats_remaining: None,
        phase: None,
    }
}

struct Fixture {
    store: MemoryStore,
    clock: Arc<ManualClock>,
    inventory: Arc<InventoryCalculator>,
    refresher: PhaseRefresher,
}

fn fixture() -> Fixture {
    let store = MemoryStore::new();
    // 2030-05-01 01:00 at UTC+7 is still 2030-04-30 in UTC.
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2030, 4, 30, 18, 0, 0).unwrap()));
    let shared: Arc<dyn BookingStore> = Arc::new(store.clone());
    let inventory = Arc::new(InventoryCalculator::new(
        shared.clone(),
        clock.clone(),
        ExpiryPolicy::default(),
    ));
    let refresher = PhaseRefresher::new(
        shared,
        inventory.clone(),
        clock.clone(),
        FixedOffset::east_opt(7 * 3600).unwrap(),
    );
    Fixture {
        store,
        clock,
        inventory,
        refresher,
    }
}

#[tokio::test]
async fn test_full_departure_starting_today_is_in_progress() {
    let f = fixture();
    let dep = departure(2, (5, 1), (5, 3));
    f.store.seed_departure(dep.clone()).await;
    f.store
        .seed_booking(Booking::new_hold(
            "c".to_string(),
            dep.id,
            SeatCount::new(2, 0),
            2_000_000,
            f.clock.now(),
            &ExpiryPolicy::default(),
        ))
        .await;

    let (phase, available) = f.refresher.current_phase(dep.id).await.unwrap();
    assert_eq!(available, 0);
    assert_eq!(phase, DeparturePhase::InProgress);
}

#[tokio::test]
async fn test_cycle_writes_only_changed_phases() {
    let f = fixture();
    let open = departure(5, (6, 1), (6, 2));
    let done = departure(5, (3, 1), (3, 2));
    f.store.seed_departure(open.clone()).await;
    f.store.seed_departure(done.clone()).await;

    let first = f.refresher.run_cycle().await;
    assert_eq!((first.examined, first.updated, first.failures), (2, 2, 0));
    let second = f.refresher.run_cycle().await;
    assert_eq!(second.updated, 0);

    let open = f.store.get_departure(open.id).await.unwrap().unwrap();
    let done = f.store.get_departure(done.id).await.unwrap().unwrap();
    assert_eq!(open.phase, Some(DeparturePhase::UpcomingOpen));
    assert_eq!(done.phase, Some(DeparturePhase::Completed));
}

#[tokio::test]
async fn test_cycle_tolerates_store_outage() {
    let f = fixture();
    f.store.seed_departure(departure(5, (6, 1), (6, 2))).await;
    f.store.set_offline(true);

    let report = f.refresher.run_cycle().await;
    assert_eq!(report.examined, 0);

    f.store.set_offline(false);
    assert_eq!(f.refresher.run_cycle().await.updated, 1);
}

#[tokio::test]
async fn test_admit_rejects_oversized_request() {
    let f = fixture();
    let dep = departure(3, (6, 1), (6, 2));
    f.store.seed_departure(dep.clone()).await;

    let mut tx = f.store.begin().await.unwrap();
    let err = f.inventory.admit(tx.as_mut(), dep.id, 4).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::CapacityExceeded {
            requested: 4,
            available: 3
        }
    ));

    let admission = f.inventory.admit(tx.as_mut(), dep.id, 3).await.unwrap();
    assert_eq!(admission.available_after(3), 0);
    drop(tx);

    assert_eq!(f.inventory.refresh(dep.id).await.unwrap(), 3);
    let cached = f.store.get_departure(dep.id).await.unwrap().unwrap();
    assert_eq!(cached.seats_remaining, Some(3));
}
