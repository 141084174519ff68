use super::calendar::now_ms;
use super::*;
use crate::gateway::{GatewayCall, RecordingGateway, StaticDirectory};
use crate::inspection::IntegrityFlag;
use crate::limits::*;
use std::sync::atomic::Ordering;

const DAY: Ms = MS_PER_DAY;
/// A fixed date comfortably inside the valid timestamp window.
const T0: Ms = MIN_VALID_TIMESTAMP_MS + 1_000 * MS_PER_DAY;

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("kerb_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}_{name}", Ulid::new()));
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(path: PathBuf, config: EngineConfig) -> (Arc<Engine>, Arc<RecordingGateway>) {
    let gateway = Arc::new(RecordingGateway::new());
    let engine = Engine::new(
        path,
        config,
        gateway.clone(),
        Arc::new(StaticDirectory::allow_all()),
        Arc::new(NotifyHub::new()),
    )
    .unwrap();
    (Arc::new(engine), gateway)
}

fn test_engine(name: &str) -> (Arc<Engine>, Arc<RecordingGateway>) {
    new_engine(test_journal_path(name), EngineConfig::default())
}

async fn listed_vehicle(engine: &Engine) -> (Ulid, Ulid) {
    let vehicle = Ulid::new();
    let owner = Ulid::new();
    engine
        .list_vehicle(vehicle, owner, 30_000, 50_000)
        .await
        .unwrap();
    (vehicle, owner)
}

/// Three-day rental at the standard test rate: 90_000 base, 9_000
/// service fee, 99_000 total.
async fn reserve_t0(engine: &Engine, vehicle: Ulid) -> Booking {
    engine
        .reserve(
            vehicle,
            Ulid::new(),
            T0,
            T0 + 3 * DAY,
            "Lyon Part-Dieu".into(),
            "Lyon Part-Dieu".into(),
            None,
        )
        .await
        .unwrap()
}

fn check_record(odometer: i64, fuel: u8, cleanliness: u8, taken_at: Ms) -> CheckRecord {
    CheckRecord {
        odometer_reading: odometer,
        fuel_level: fuel,
        component_checklist: ComponentChecklist::default(),
        damages: Vec::new(),
        cleanliness_rating: cleanliness,
        photos: vec!["photo-1".into()],
        signature: "renter-sig".into(),
        taken_at,
    }
}

fn damage(location: &str, description: &str) -> DamageItem {
    DamageItem {
        id: Ulid::new(),
        location: location.into(),
        description: description.into(),
        severity: Severity::Minor,
    }
}

// ── Vehicle management ───────────────────────────────────

#[tokio::test]
async fn engine_list_and_query_vehicle() {
    let (engine, _) = test_engine("list_vehicle.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;

    let vs = engine.get_vehicle(&vehicle).unwrap();
    let guard = vs.read().await;
    assert_eq!(guard.owner_id, owner);
    assert_eq!(guard.daily_rate, 30_000);
    assert_eq!(guard.deposit, 50_000);
    drop(guard);

    let listed = engine.list_vehicles().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, vehicle);
}

#[tokio::test]
async fn engine_duplicate_vehicle_rejected() {
    let (engine, _) = test_engine("dup_vehicle.journal");

    let id = Ulid::new();
    engine.list_vehicle(id, Ulid::new(), 10_000, 0).await.unwrap();
    let result = engine.list_vehicle(id, Ulid::new(), 10_000, 0).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn engine_list_vehicle_validates_inputs() {
    let (engine, _) = test_engine("bad_vehicle.journal");

    let result = engine.list_vehicle(Ulid::new(), Ulid::new(), 0, 0).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
    let result = engine.list_vehicle(Ulid::new(), Ulid::new(), 10_000, -1).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn engine_retire_vehicle() {
    let (engine, _) = test_engine("retire.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;
    engine
        .cancel_booking(booking.id, booking.renter_id, "changed plans")
        .await
        .unwrap();

    // Terminal bookings do not hold the calendar, so retirement goes through
    engine.retire_vehicle(vehicle, owner).await.unwrap();
    assert!(engine.get_vehicle(&vehicle).is_none());
    assert!(engine.vehicle_for_entity(&booking.id).is_none());
}

#[tokio::test]
async fn engine_retire_with_active_booking_fails() {
    let (engine, _) = test_engine("retire_active.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    reserve_t0(&engine, vehicle).await;

    let result = engine.retire_vehicle(vehicle, owner).await;
    assert!(matches!(result, Err(EngineError::HasActiveBookings(_))));
}

#[tokio::test]
async fn engine_retire_wrong_owner() {
    let (engine, _) = test_engine("retire_wrong_owner.journal");

    let (vehicle, _owner) = listed_vehicle(&engine).await;
    let stranger = Ulid::new();
    let result = engine.retire_vehicle(vehicle, stranger).await;
    assert!(matches!(result, Err(EngineError::NotOwner(id)) if id == stranger));
}

// ── Reserve ──────────────────────────────────────────────

#[tokio::test]
async fn engine_reserve_places_hold_and_authorizes() {
    let (engine, gateway) = test_engine("reserve_hold.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.owner_id, owner);
    assert_eq!(booking.price.total, 99_000);
    assert_eq!(booking.caution_amount, 50_000);
    assert!(booking.payment_ref.is_none());

    assert_eq!(
        gateway.calls(),
        vec![GatewayCall::Authorize {
            booking_id: booking.id,
            amount: 99_000,
            deposit: 50_000,
        }]
    );

    // The hold occupies the calendar until the owner answers
    let free = engine.free_windows(vehicle, T0, T0 + 10 * DAY).await.unwrap();
    assert_eq!(free, vec![Span::new(T0 + 3 * DAY, T0 + 10 * DAY)]);
}

#[tokio::test]
async fn engine_reserve_overlap_rejected_adjacent_allowed() {
    let (engine, _) = test_engine("reserve_overlap.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;
    reserve_t0(&engine, vehicle).await;

    // [T0+2d, T0+5d) overlaps the held [T0, T0+3d)
    let result = engine
        .reserve(
            vehicle,
            Ulid::new(),
            T0 + 2 * DAY,
            T0 + 5 * DAY,
            "Nice".into(),
            "Nice".into(),
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::Busy { reason: BusyReason::Booked, .. })
    ));

    // [T0+3d, T0+5d) shares only the boundary instant, so back-to-back is fine
    engine
        .reserve(
            vehicle,
            Ulid::new(),
            T0 + 3 * DAY,
            T0 + 5 * DAY,
            "Nice".into(),
            "Nice".into(),
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn engine_reserve_unknown_vehicle() {
    let (engine, _) = test_engine("reserve_unknown.journal");

    let result = engine
        .reserve(
            Ulid::new(),
            Ulid::new(),
            T0,
            T0 + DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        )
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn engine_reserve_own_vehicle_rejected() {
    let (engine, _) = test_engine("reserve_own.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let result = engine
        .reserve(vehicle, owner, T0, T0 + DAY, "Lyon".into(), "Lyon".into(), None)
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn engine_reserve_unverified_renter() {
    let renter = Ulid::new();
    let engine = Engine::new(
        test_journal_path("reserve_unverified.journal"),
        EngineConfig::default(),
        Arc::new(RecordingGateway::new()),
        Arc::new(StaticDirectory::allow_all().deny(renter)),
        Arc::new(NotifyHub::new()),
    )
    .unwrap();

    let (vehicle, _) = listed_vehicle(&engine).await;
    let result = engine
        .reserve(vehicle, renter, T0, T0 + DAY, "Lyon".into(), "Lyon".into(), None)
        .await;
    assert!(matches!(result, Err(EngineError::UnverifiedRenter(id)) if id == renter));
}

#[tokio::test]
async fn engine_reserve_declined_authorization_leaves_no_hold() {
    let (engine, gateway) = test_engine("reserve_declined.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;
    gateway.fail_authorize.store(true, Ordering::Relaxed);

    let err = engine
        .reserve(
            vehicle,
            Ulid::new(),
            T0,
            T0 + 3 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Upstream { call: "authorize", .. }));
    assert!(err.is_retryable());

    // The decline left nothing behind: the dates are still free
    let free = engine.free_windows(vehicle, T0, T0 + 10 * DAY).await.unwrap();
    assert_eq!(free, vec![Span::new(T0, T0 + 10 * DAY)]);

    gateway.fail_authorize.store(false, Ordering::Relaxed);
    reserve_t0(&engine, vehicle).await;
}

#[tokio::test]
async fn engine_reserve_validates_range_and_locations() {
    let (engine, _) = test_engine("reserve_validate.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;

    let result = engine
        .reserve(vehicle, Ulid::new(), T0 + DAY, T0, "A".into(), "B".into(), None)
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    let result = engine
        .reserve(
            vehicle,
            Ulid::new(),
            T0,
            T0 + MAX_SPAN_DURATION_MS + DAY,
            "A".into(),
            "B".into(),
            None,
        )
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));

    let result = engine
        .reserve(vehicle, Ulid::new(), 0, DAY, "A".into(), "B".into(), None)
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));

    let result = engine
        .reserve(vehicle, Ulid::new(), T0, T0 + DAY, "".into(), "B".into(), None)
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn engine_reserve_with_promo() {
    let config = EngineConfig::default().with_promo("SPRING20", 0.20);
    let (engine, _) = new_engine(test_journal_path("reserve_promo.journal"), config);

    let (vehicle, _) = listed_vehicle(&engine).await;
    let booking = engine
        .reserve(
            vehicle,
            Ulid::new(),
            T0,
            T0 + 3 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            Some("SPRING20"),
        )
        .await
        .unwrap();

    // 90_000 base, 18_000 off, 10% fee on the discounted 72_000
    assert_eq!(booking.price.discount, 18_000);
    assert_eq!(booking.price.service_fee, 7_200);
    assert_eq!(booking.price.total, 79_200);
    assert_eq!(booking.price.promo_code.as_deref(), Some("SPRING20"));

    let result = engine
        .reserve(
            vehicle,
            Ulid::new(),
            T0 + 10 * DAY,
            T0 + 12 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            Some("BOGUS"),
        )
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

// ── Accept / reject ──────────────────────────────────────

#[tokio::test]
async fn engine_accept_captures_and_confirms() {
    let (engine, gateway) = test_engine("accept.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    let confirmed = engine.accept_booking(booking.id, owner).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(
        confirmed.payment_ref.as_deref(),
        Some(format!("cap-{}", booking.id).as_str())
    );

    assert!(gateway.calls().contains(&GatewayCall::Capture {
        booking_id: booking.id,
        amount: 99_000,
    }));

    // Dates stay occupied, now by a booking instead of a hold
    let result = engine
        .reserve(
            vehicle,
            Ulid::new(),
            T0 + DAY,
            T0 + 2 * DAY,
            "Nice".into(),
            "Nice".into(),
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::Busy { reason: BusyReason::Booked, .. })
    ));
}

#[tokio::test]
async fn engine_accept_wrong_owner() {
    let (engine, _) = test_engine("accept_wrong_owner.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    let result = engine.accept_booking(booking.id, Ulid::new()).await;
    assert!(matches!(result, Err(EngineError::NotOwner(_))));
}

#[tokio::test]
async fn engine_accept_capture_failure_keeps_booking_pending() {
    let (engine, gateway) = test_engine("accept_capture_fail.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    gateway.fail_capture.store(true, Ordering::Relaxed);
    let err = engine.accept_booking(booking.id, owner).await.unwrap_err();
    assert!(matches!(err, EngineError::Upstream { call: "capture", .. }));
    assert!(err.is_retryable());

    let still = engine.get_booking(booking.id).await.unwrap();
    assert_eq!(still.status, BookingStatus::Pending);

    // The owner retries once the gateway recovers
    gateway.fail_capture.store(false, Ordering::Relaxed);
    let confirmed = engine.accept_booking(booking.id, owner).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn engine_accept_after_hold_lapse_fails() {
    let config = EngineConfig {
        hold_ttl_ms: 0,
        ..EngineConfig::default()
    };
    let (engine, _) = new_engine(test_journal_path("accept_lapsed.journal"), config);

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    // The hold lapsed before the owner answered; the accept settles the
    // expiry first and then refuses the transition.
    let result = engine.accept_booking(booking.id, owner).await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition { status: BookingStatus::Cancelled, action: "accept" })
    ));

    let expired = engine.get_booking(booking.id).await.unwrap();
    assert_eq!(expired.status, BookingStatus::Cancelled);
    assert_eq!(expired.closed_note.as_deref(), Some("hold expired"));

    // The lapsed hold no longer occupies the calendar
    let free = engine.free_windows(vehicle, T0, T0 + 10 * DAY).await.unwrap();
    assert_eq!(free, vec![Span::new(T0, T0 + 10 * DAY)]);
}

#[tokio::test]
async fn engine_reject_releases_dates() {
    let (engine, _) = test_engine("reject.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    let rejected = engine
        .reject_booking(booking.id, owner, "vehicle needs service")
        .await
        .unwrap();
    assert_eq!(rejected.status, BookingStatus::Rejected);
    assert_eq!(rejected.closed_note.as_deref(), Some("vehicle needs service"));

    // The same dates are reservable again
    reserve_t0(&engine, vehicle).await;
}

#[tokio::test]
async fn engine_reject_only_from_pending() {
    let (engine, _) = test_engine("reject_confirmed.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;
    engine.accept_booking(booking.id, owner).await.unwrap();

    let result = engine.reject_booking(booking.id, owner, "too late").await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition { status: BookingStatus::Confirmed, action: "reject" })
    ));
}

// ── Cancel ───────────────────────────────────────────────

#[tokio::test]
async fn engine_cancel_pending_full_refund_without_gateway() {
    let (engine, gateway) = test_engine("cancel_pending.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    let (cancelled, cancellation) = engine
        .cancel_booking(booking.id, booking.renter_id, "found another car")
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancellation.cancelled_by, CancelledBy::Renter);
    assert_eq!(cancellation.refund_percentage, 100);
    assert_eq!(cancellation.refund_amount, 99_000);
    assert_eq!(cancellation.fee_amount, 0);
    // Nothing was captured, so nothing moves back
    assert_eq!(cancellation.refund_status, RefundStatus::Settled);
    assert!(
        !gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::Refund { .. }))
    );

    // Dates are free again
    reserve_t0(&engine, vehicle).await;
}

#[tokio::test]
async fn engine_cancel_confirmed_early_full_refund() {
    let (engine, gateway) = test_engine("cancel_early.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let start = now_ms() + 8 * DAY;
    let booking = engine
        .reserve(
            vehicle,
            Ulid::new(),
            start,
            start + 3 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        )
        .await
        .unwrap();
    engine.accept_booking(booking.id, owner).await.unwrap();

    let (_, cancellation) = engine
        .cancel_booking(booking.id, booking.renter_id, "trip cancelled")
        .await
        .unwrap();
    assert_eq!(cancellation.days_before_start, 7);
    assert_eq!(cancellation.refund_percentage, 100);
    assert_eq!(cancellation.refund_amount, 99_000);
    assert_eq!(cancellation.fee_amount, 0);
    assert_eq!(cancellation.refund_status, RefundStatus::Instructed);
    assert!(gateway.calls().contains(&GatewayCall::Refund {
        booking_id: booking.id,
        amount: 99_000,
    }));
}

#[tokio::test]
async fn engine_cancel_confirmed_mid_window_splits_evenly() {
    let (engine, _) = test_engine("cancel_mid.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let start = now_ms() + 4 * DAY;
    let booking = engine
        .reserve(
            vehicle,
            Ulid::new(),
            start,
            start + 3 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        )
        .await
        .unwrap();
    engine.accept_booking(booking.id, owner).await.unwrap();

    let (_, cancellation) = engine
        .cancel_booking(booking.id, booking.renter_id, "half refund window")
        .await
        .unwrap();
    assert_eq!(cancellation.days_before_start, 3);
    assert_eq!(cancellation.refund_percentage, 50);
    assert_eq!(cancellation.refund_amount, 49_500);
    assert_eq!(cancellation.fee_amount, 49_500);
    assert_eq!(
        cancellation.refund_amount + cancellation.fee_amount,
        booking.price.total
    );
}

#[tokio::test]
async fn engine_cancel_confirmed_late_no_refund() {
    let (engine, gateway) = test_engine("cancel_late.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let start = now_ms() + DAY;
    let booking = engine
        .reserve(
            vehicle,
            Ulid::new(),
            start,
            start + 3 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        )
        .await
        .unwrap();
    engine.accept_booking(booking.id, owner).await.unwrap();

    let (_, cancellation) = engine
        .cancel_booking(booking.id, booking.renter_id, "last minute")
        .await
        .unwrap();
    assert_eq!(cancellation.days_before_start, 0);
    assert_eq!(cancellation.refund_percentage, 0);
    assert_eq!(cancellation.refund_amount, 0);
    assert_eq!(cancellation.fee_amount, 99_000);
    // Zero refund means no instruction to the gateway
    assert_eq!(cancellation.refund_status, RefundStatus::Settled);
    assert!(
        !gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::Refund { .. }))
    );
}

#[tokio::test]
async fn engine_cancel_by_owner() {
    let (engine, _) = test_engine("cancel_owner.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    let (_, cancellation) = engine
        .cancel_booking(booking.id, owner, "vehicle damaged by prior renter")
        .await
        .unwrap();
    assert_eq!(cancellation.cancelled_by, CancelledBy::Owner);
}

#[tokio::test]
async fn engine_cancel_by_outsider_rejected() {
    let (engine, _) = test_engine("cancel_outsider.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    let stranger = Ulid::new();
    let result = engine.cancel_booking(booking.id, stranger, "not mine").await;
    assert!(matches!(result, Err(EngineError::NotParticipant(id)) if id == stranger));
}

#[tokio::test]
async fn engine_cancel_refund_failure_still_cancels_and_alerts() {
    let (engine, gateway) = test_engine("cancel_refund_fail.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let start = now_ms() + 8 * DAY;
    let booking = engine
        .reserve(
            vehicle,
            Ulid::new(),
            start,
            start + 3 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        )
        .await
        .unwrap();
    engine.accept_booking(booking.id, owner).await.unwrap();

    gateway.fail_refund.store(true, Ordering::Relaxed);
    let (cancelled, cancellation) = engine
        .cancel_booking(booking.id, booking.renter_id, "gateway down day")
        .await
        .unwrap();

    // The cancellation itself is never blocked on the refund leg
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancellation.refund_status, RefundStatus::InstructionFailed);

    let alerts = engine.drain_integrity_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].booking_id, booking.id);
    assert!(matches!(
        alerts[0].kind,
        AlertKind::RefundNotInstructed { amount: 99_000 }
    ));
    assert!(engine.drain_integrity_alerts().is_empty());
}

#[tokio::test]
async fn engine_cancel_during_rental() {
    let (engine, _) = test_engine("cancel_in_progress.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let start = now_ms() + 2 * 3_600_000;
    let booking = engine
        .reserve(
            vehicle,
            Ulid::new(),
            start,
            start + 2 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        )
        .await
        .unwrap();
    engine.accept_booking(booking.id, owner).await.unwrap();
    engine
        .record_check_in(booking.id, check_record(50_000, 90, 5, now_ms()))
        .await
        .unwrap();

    let (cancelled, cancellation) = engine
        .cancel_booking(booking.id, booking.renter_id, "breakdown")
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    // Inside the rental the tier bottoms out: no refund
    assert_eq!(cancellation.refund_percentage, 0);
    assert_eq!(cancellation.fee_amount, booking.price.total);

    // Remaining dates reopen for other renters
    let free = engine
        .free_windows(vehicle, start, start + 2 * DAY)
        .await
        .unwrap();
    assert_eq!(free, vec![Span::new(start, start + 2 * DAY)]);
}

// ── Check-in / check-out ─────────────────────────────────

#[tokio::test]
async fn engine_check_in_moves_to_in_progress() {
    let (engine, _) = test_engine("check_in.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;
    engine.accept_booking(booking.id, owner).await.unwrap();

    let record = check_record(50_000, 90, 5, T0);
    let updated = engine.record_check_in(booking.id, record.clone()).await.unwrap();
    assert_eq!(updated.status, BookingStatus::InProgress);
    assert_eq!(updated.check_in, Some(record));
}

#[tokio::test]
async fn engine_check_in_requires_confirmed() {
    let (engine, _) = test_engine("check_in_pending.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    let result = engine
        .record_check_in(booking.id, check_record(50_000, 90, 5, T0))
        .await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition { status: BookingStatus::Pending, action: "check-in" })
    ));
}

#[tokio::test]
async fn engine_check_record_validation() {
    let (engine, _) = test_engine("check_validate.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;
    engine.accept_booking(booking.id, owner).await.unwrap();

    let result = engine
        .record_check_in(booking.id, check_record(50_000, 101, 5, T0))
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    let result = engine
        .record_check_in(booking.id, check_record(50_000, 90, 0, T0))
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    let result = engine
        .record_check_in(booking.id, check_record(-1, 90, 5, T0))
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    let mut unsigned = check_record(50_000, 90, 5, T0);
    unsigned.signature.clear();
    let result = engine.record_check_in(booking.id, unsigned).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn engine_check_out_completes_and_frees_dates() {
    let (engine, _) = test_engine("check_out.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;
    engine.accept_booking(booking.id, owner).await.unwrap();
    engine
        .record_check_in(booking.id, check_record(50_000, 90, 5, T0))
        .await
        .unwrap();

    let (completed, report) = engine
        .record_check_out(booking.id, check_record(50_250, 88, 5, T0 + 3 * DAY))
        .await
        .unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);
    assert_eq!(report.charges, ConditionCharges::default());
    assert_eq!(completed.condition_charges, Some(report.charges));

    let free = engine.free_windows(vehicle, T0, T0 + 10 * DAY).await.unwrap();
    assert_eq!(free, vec![Span::new(T0, T0 + 10 * DAY)]);

    // With the rental settled the vehicle can be retired
    engine.retire_vehicle(vehicle, owner).await.unwrap();
}

#[tokio::test]
async fn engine_check_out_itemizes_charges() {
    let (engine, _) = test_engine("check_out_charges.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;
    engine.accept_booking(booking.id, owner).await.unwrap();
    engine
        .record_check_in(booking.id, check_record(50_000, 80, 5, T0))
        .await
        .unwrap();

    let mut return_record = check_record(50_100, 60, 5, T0 + 2 * DAY);
    return_record.damages.push(damage("front bumper", "scratch"));
    let (completed, report) = engine
        .record_check_out(booking.id, return_record)
        .await
        .unwrap();

    // 20 fuel points at 150, one new damage at 7_500, mileage inside allowance
    assert_eq!(report.charges.fuel_penalty, 3_000);
    assert_eq!(report.charges.damage_penalty, 7_500);
    assert_eq!(report.charges.mileage_penalty, 0);
    assert_eq!(report.charges.total, 10_500);
    assert_eq!(completed.condition_charges.unwrap().total, 10_500);
    assert!(report.flags.is_empty());
    assert!(engine.drain_integrity_alerts().is_empty());
}

#[tokio::test]
async fn engine_check_out_excess_mileage_billed() {
    let (engine, _) = test_engine("check_out_mileage.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;
    engine.accept_booking(booking.id, owner).await.unwrap();
    engine
        .record_check_in(booking.id, check_record(10_000, 90, 5, T0))
        .await
        .unwrap();

    // 700 km over 3 days with 200 km/day included: 100 km excess at 25
    let (_, report) = engine
        .record_check_out(booking.id, check_record(10_700, 90, 5, T0 + 3 * DAY))
        .await
        .unwrap();
    assert_eq!(report.mileage_difference, 700);
    assert_eq!(report.charges.mileage_penalty, 2_500);
}

#[tokio::test]
async fn engine_check_out_rollback_flags_operator_alert() {
    let (engine, _) = test_engine("check_out_rollback.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;
    engine.accept_booking(booking.id, owner).await.unwrap();
    engine
        .record_check_in(booking.id, check_record(50_000, 90, 5, T0))
        .await
        .unwrap();

    let (_, report) = engine
        .record_check_out(booking.id, check_record(49_900, 90, 5, T0 + 3 * DAY))
        .await
        .unwrap();
    assert_eq!(report.charges.mileage_penalty, 0);
    assert_eq!(
        report.flags,
        vec![IntegrityFlag::OdometerRollback { kilometres: 100 }]
    );

    let alerts = engine.drain_integrity_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].booking_id, booking.id);
    assert!(matches!(
        alerts[0].kind,
        AlertKind::Condition(IntegrityFlag::OdometerRollback { kilometres: 100 })
    ));
}

#[tokio::test]
async fn engine_check_out_requires_check_in() {
    let (engine, _) = test_engine("check_out_no_check_in.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;
    engine.accept_booking(booking.id, owner).await.unwrap();

    let result = engine
        .record_check_out(booking.id, check_record(50_100, 90, 5, T0 + 3 * DAY))
        .await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition { status: BookingStatus::Confirmed, action: "check-out" })
    ));
}

// ── Owner blocks ─────────────────────────────────────────

#[tokio::test]
async fn engine_block_and_unblock_dates() {
    let (engine, _) = test_engine("block_dates.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let blocked = engine
        .block_dates(
            vehicle,
            owner,
            &[(T0, T0 + 2 * DAY), (T0 + 5 * DAY, T0 + 6 * DAY)],
            BlockReason::Maintenance,
            Some("brake service".into()),
        )
        .await
        .unwrap();
    assert_eq!(blocked.len(), 2);

    let listed = engine.list_blocks(vehicle).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].reason, BlockReason::Maintenance);

    let result = engine
        .reserve(
            vehicle,
            Ulid::new(),
            T0 + DAY,
            T0 + 3 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::Busy { reason: BusyReason::Blocked, .. })
    ));

    let ids: Vec<Ulid> = blocked.iter().map(|b| b.id).collect();
    engine.unblock_dates(vehicle, owner, &ids).await.unwrap();
    assert!(engine.list_blocks(vehicle).await.unwrap().is_empty());

    // Releasing an already-released block is a no-op
    engine.unblock_dates(vehicle, owner, &ids).await.unwrap();

    reserve_t0(&engine, vehicle).await;
}

#[tokio::test]
async fn engine_block_colliding_with_booking_is_atomic() {
    let (engine, _) = test_engine("block_atomic.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    reserve_t0(&engine, vehicle).await;

    // Second range collides with the held booking, so neither lands
    let result = engine
        .block_dates(
            vehicle,
            owner,
            &[(T0 + 10 * DAY, T0 + 12 * DAY), (T0 + 2 * DAY, T0 + 4 * DAY)],
            BlockReason::Manual,
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::Busy { reason: BusyReason::Booked, .. })
    ));
    assert!(engine.list_blocks(vehicle).await.unwrap().is_empty());

    // Blocks may stack on top of each other, though
    engine
        .block_dates(vehicle, owner, &[(T0 + 10 * DAY, T0 + 12 * DAY)], BlockReason::Manual, None)
        .await
        .unwrap();
    engine
        .block_dates(vehicle, owner, &[(T0 + 11 * DAY, T0 + 13 * DAY)], BlockReason::Other, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn engine_block_wrong_owner() {
    let (engine, _) = test_engine("block_wrong_owner.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;
    let result = engine
        .block_dates(vehicle, Ulid::new(), &[(T0, T0 + DAY)], BlockReason::Manual, None)
        .await;
    assert!(matches!(result, Err(EngineError::NotOwner(_))));
}

#[tokio::test]
async fn engine_unblock_rejects_non_block_ids() {
    let (engine, _) = test_engine("unblock_non_block.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    // A booking id is not a block id
    let result = engine.unblock_dates(vehicle, owner, &[booking.id]).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    // A block on another vehicle cannot be released through this one
    let (other_vehicle, other_owner) = listed_vehicle(&engine).await;
    let blocked = engine
        .block_dates(other_vehicle, other_owner, &[(T0, T0 + DAY)], BlockReason::Manual, None)
        .await
        .unwrap();
    let result = engine.unblock_dates(vehicle, owner, &[blocked[0].id]).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn engine_quote_matches_reserved_price() {
    let (engine, _) = test_engine("quote.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;
    let quoted = engine.quote(vehicle, T0, T0 + 3 * DAY, None).await.unwrap();
    assert_eq!(quoted.duration_days, 3);
    assert_eq!(quoted.base_price, 90_000);
    assert_eq!(quoted.service_fee, 9_000);
    assert_eq!(quoted.total, 99_000);

    let booking = reserve_t0(&engine, vehicle).await;
    assert_eq!(booking.price, quoted);

    // Quoting the now-held dates reports the conflict instead of a price
    let result = engine.quote(vehicle, T0, T0 + 3 * DAY, None).await;
    assert!(matches!(result, Err(EngineError::Busy { .. })));

    let result = engine.quote(Ulid::new(), T0, T0 + 3 * DAY, None).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn engine_free_windows_subtracts_and_merges() {
    let (engine, _) = test_engine("free_windows.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    reserve_t0(&engine, vehicle).await;
    engine
        .block_dates(vehicle, owner, &[(T0 + 5 * DAY, T0 + 6 * DAY)], BlockReason::Manual, None)
        .await
        .unwrap();

    let free = engine.free_windows(vehicle, T0, T0 + 10 * DAY).await.unwrap();
    assert_eq!(
        free,
        vec![
            Span::new(T0 + 3 * DAY, T0 + 5 * DAY),
            Span::new(T0 + 6 * DAY, T0 + 10 * DAY),
        ]
    );

    let result = engine.free_windows(vehicle, T0, T0 + 400 * DAY).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));

    // Unknown vehicles read as having no calendar at all
    let free = engine.free_windows(Ulid::new(), T0, T0 + DAY).await.unwrap();
    assert!(free.is_empty());
}

#[tokio::test]
async fn engine_list_bookings_ordered_by_creation() {
    let (engine, _) = test_engine("list_bookings.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;
    let first = reserve_t0(&engine, vehicle).await;
    // Distinct created_at millis keep the creation order unambiguous
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = engine
        .reserve(
            vehicle,
            Ulid::new(),
            T0 + 5 * DAY,
            T0 + 7 * DAY,
            "Nice".into(),
            "Nice".into(),
            None,
        )
        .await
        .unwrap();

    let bookings = engine.list_bookings(vehicle).await.unwrap();
    assert_eq!(bookings.len(), 2);
    assert_eq!(bookings[0].id, first.id);
    assert_eq!(bookings[1].id, second.id);

    assert_eq!(engine.get_booking(first.id).await.unwrap().id, first.id);
    assert!(matches!(
        engine.get_booking(Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));

    assert!(engine.list_bookings(Ulid::new()).await.unwrap().is_empty());
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn engine_journal_replay_restores_bookings() {
    let path = test_journal_path("replay.journal");

    let (vehicle, owner) = {
        let (engine, _) = new_engine(path.clone(), EngineConfig::default());
        let (vehicle, owner) = listed_vehicle(&engine).await;
        let booking = reserve_t0(&engine, vehicle).await;
        engine.accept_booking(booking.id, owner).await.unwrap();
        (vehicle, owner)
    };

    let (engine2, _) = new_engine(path, EngineConfig::default());
    let bookings = engine2.list_bookings(vehicle).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].status, BookingStatus::Confirmed);
    assert!(bookings[0].payment_ref.is_some());

    // The confirmed dates still occupy the calendar after replay
    let result = engine2
        .reserve(
            vehicle,
            Ulid::new(),
            T0 + DAY,
            T0 + 2 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        )
        .await;
    assert!(matches!(result, Err(EngineError::Busy { .. })));

    let vehicles = engine2.list_vehicles().await;
    assert_eq!(vehicles.len(), 1);
    assert_eq!(vehicles[0].owner_id, owner);
}

#[tokio::test]
async fn engine_journal_replay_after_cancellation() {
    let path = test_journal_path("replay_cancel.journal");

    let (vehicle, booking_id) = {
        let (engine, _) = new_engine(path.clone(), EngineConfig::default());
        let (vehicle, _) = listed_vehicle(&engine).await;
        let booking = reserve_t0(&engine, vehicle).await;
        engine
            .cancel_booking(booking.id, booking.renter_id, "plans changed")
            .await
            .unwrap();
        (vehicle, booking.id)
    };

    let (engine2, _) = new_engine(path, EngineConfig::default());
    let restored = engine2.get_booking(booking_id).await.unwrap();
    assert_eq!(restored.status, BookingStatus::Cancelled);
    let cancellation = restored.cancellation.unwrap();
    assert_eq!(cancellation.refund_percentage, 100);

    // Terminal bookings release the calendar on replay too
    let free = engine2.free_windows(vehicle, T0, T0 + 10 * DAY).await.unwrap();
    assert_eq!(free, vec![Span::new(T0, T0 + 10 * DAY)]);
}

#[tokio::test]
async fn engine_retired_vehicle_stays_gone_after_replay() {
    let path = test_journal_path("replay_retire.journal");

    let vehicle = {
        let (engine, _) = new_engine(path.clone(), EngineConfig::default());
        let (vehicle, owner) = listed_vehicle(&engine).await;
        engine.retire_vehicle(vehicle, owner).await.unwrap();
        vehicle
    };

    let (engine2, _) = new_engine(path, EngineConfig::default());
    assert!(engine2.get_vehicle(&vehicle).is_none());
    assert!(engine2.list_vehicles().await.is_empty());
}

#[tokio::test]
async fn engine_snapshot_preserves_state() {
    let path = test_journal_path("snapshot.journal");

    let (engine, _) = new_engine(path.clone(), EngineConfig::default());
    let (vehicle, owner) = listed_vehicle(&engine).await;
    let pending = reserve_t0(&engine, vehicle).await;
    let confirmed = engine
        .reserve(
            vehicle,
            Ulid::new(),
            T0 + 5 * DAY,
            T0 + 7 * DAY,
            "Nice".into(),
            "Nice".into(),
            None,
        )
        .await
        .unwrap();
    engine.accept_booking(confirmed.id, owner).await.unwrap();
    engine
        .block_dates(vehicle, owner, &[(T0 + 10 * DAY, T0 + 11 * DAY)], BlockReason::Maintenance, None)
        .await
        .unwrap();

    assert!(engine.journal_records_since_snapshot().await > 0);
    engine.snapshot_journal().await.unwrap();
    assert_eq!(engine.journal_records_since_snapshot().await, 0);
    drop(engine);

    let (engine2, _) = new_engine(path, EngineConfig::default());
    let bookings = engine2.list_bookings(vehicle).await.unwrap();
    assert_eq!(bookings.len(), 2);
    assert_eq!(
        engine2.get_booking(pending.id).await.unwrap().status,
        BookingStatus::Pending
    );
    assert_eq!(
        engine2.get_booking(confirmed.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
    assert_eq!(engine2.list_blocks(vehicle).await.unwrap().len(), 1);

    let free = engine2.free_windows(vehicle, T0, T0 + 12 * DAY).await.unwrap();
    assert_eq!(
        free,
        vec![
            Span::new(T0 + 3 * DAY, T0 + 5 * DAY),
            Span::new(T0 + 7 * DAY, T0 + 10 * DAY),
            Span::new(T0 + 11 * DAY, T0 + 12 * DAY),
        ]
    );
}

// ── Expiry sweep ─────────────────────────────────────────

#[tokio::test]
async fn engine_expire_booking_frees_dates() {
    let config = EngineConfig {
        hold_ttl_ms: 0,
        ..EngineConfig::default()
    };
    let (engine, _) = new_engine(test_journal_path("expire.journal"), config);

    let (vehicle, _) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    let now = now_ms();
    let expired = engine.collect_expired_holds(now);
    assert_eq!(expired, vec![(booking.id, vehicle)]);

    engine.expire_booking(booking.id, now).await.unwrap();
    let after = engine.get_booking(booking.id).await.unwrap();
    assert_eq!(after.status, BookingStatus::Cancelled);
    assert_eq!(after.closed_note.as_deref(), Some("hold expired"));

    reserve_t0(&engine, vehicle).await;
}

#[tokio::test]
async fn engine_expire_skips_live_and_confirmed() {
    let (engine, _) = test_engine("expire_skip.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let booking = reserve_t0(&engine, vehicle).await;

    // Hold still live under the default TTL
    assert!(engine.collect_expired_holds(now_ms()).is_empty());
    let result = engine.expire_booking(booking.id, now_ms()).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    engine.accept_booking(booking.id, owner).await.unwrap();
    let result = engine.expire_booking(booking.id, now_ms()).await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition { status: BookingStatus::Confirmed, action: "expire" })
    ));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test]
async fn engine_concurrent_reserve_exactly_one_wins() {
    let (engine, _) = test_engine("concurrent_reserve.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;
    let (a, b) = tokio::join!(
        engine.reserve(
            vehicle,
            Ulid::new(),
            T0,
            T0 + 3 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        ),
        engine.reserve(
            vehicle,
            Ulid::new(),
            T0 + DAY,
            T0 + 4 * DAY,
            "Nice".into(),
            "Nice".into(),
            None,
        ),
    );

    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(
        loser,
        Err(EngineError::Busy { reason: BusyReason::Booked, .. })
    ));
}

#[tokio::test]
async fn engine_independent_vehicles_reserve_in_parallel() {
    let (engine, _) = test_engine("parallel_vehicles.journal");

    let (vehicle_a, _) = listed_vehicle(&engine).await;
    let (vehicle_b, _) = listed_vehicle(&engine).await;

    let (a, b) = tokio::join!(
        engine.reserve(
            vehicle_a,
            Ulid::new(),
            T0,
            T0 + 3 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        ),
        engine.reserve(
            vehicle_b,
            Ulid::new(),
            T0,
            T0 + 3 * DAY,
            "Lyon".into(),
            "Lyon".into(),
            None,
        ),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn engine_subscribe_streams_booking_events() {
    let (engine, _) = test_engine("subscribe.journal");

    let (vehicle, owner) = listed_vehicle(&engine).await;
    let mut rx = engine.subscribe(vehicle);

    let booking = reserve_t0(&engine, vehicle).await;
    let event = rx.recv().await.unwrap();
    assert!(matches!(event, Event::BookingRequested { booking: b, .. } if b.id == booking.id));

    engine.accept_booking(booking.id, owner).await.unwrap();
    let event = rx.recv().await.unwrap();
    assert!(matches!(event, Event::BookingAccepted { id, .. } if id == booking.id));
}

// ── Randomized invariant ─────────────────────────────────

#[tokio::test]
async fn randomized_reservations_never_overlap() {
    let (engine, _) = test_engine("random_overlap.journal");

    let (vehicle, _) = listed_vehicle(&engine).await;

    let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        seed
    };

    let mut placed: Vec<Span> = Vec::new();
    for _ in 0..200 {
        let start = T0 + (next() % 60) as Ms * DAY;
        let end = start + (next() % 7 + 1) as Ms * DAY;
        match engine
            .reserve(vehicle, Ulid::new(), start, end, "Lyon".into(), "Nice".into(), None)
            .await
        {
            Ok(b) => placed.push(b.span),
            Err(EngineError::Busy { .. }) => {}
            Err(e) => panic!("unexpected reserve error: {e}"),
        }
    }

    assert!(!placed.is_empty());
    for i in 0..placed.len() {
        for j in (i + 1)..placed.len() {
            assert!(
                !placed[i].overlaps(&placed[j]),
                "{:?} overlaps {:?}",
                placed[i],
                placed[j]
            );
        }
    }
}

