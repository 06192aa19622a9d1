//! Booking state machine integration tests.

mod common;

use booking_service::models::{BookingStatus, DateFilter};
use booking_service::services::{BookingError, IllegalState};
use common::{
    balance, day, dec, escrow_net, fund, request, slot, spawn_state, PLATFORM,
};
use rust_decimal::Decimal;
use uuid::Uuid;

#[tokio::test]
async fn create_then_accept_splits_escrow() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let booking = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(balance(&state, "S1").await, Decimal::ZERO);

    let accepted = state.engine.accept(booking.booking_id).await.unwrap();
    assert_eq!(accepted.status, BookingStatus::Confirmed);

    assert_eq!(balance(&state, "T1").await, dec("95"));
    assert_eq!(balance(&state, PLATFORM).await, dec("5"));
    assert_eq!(balance(&state, "S1").await, Decimal::ZERO);
    assert_eq!(escrow_net(&state, &accepted).await, Decimal::ZERO);
}

#[tokio::test]
async fn overlapping_provider_slot_is_rejected() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;
    fund(&state, "S2", "100").await;

    let first = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();

    let err = state
        .engine
        .create(request("S2", "T1", "2025-11-01", "10:30", "11:30", "100"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Conflict(id) if id == first.booking_id));

    // No hold taken for the rejected request.
    assert_eq!(balance(&state, "S2").await, dec("100"));
}

#[tokio::test]
async fn adjacent_slots_do_not_conflict() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;
    fund(&state, "S2", "100").await;

    state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "50"))
        .await
        .unwrap();
    let next = state
        .engine
        .create(request("S2", "T1", "2025-11-01", "11:00", "12:00", "50"))
        .await
        .unwrap();
    assert_eq!(next.status, BookingStatus::Pending);
}

#[tokio::test]
async fn requester_cannot_double_book_across_providers() {
    let state = spawn_state();
    fund(&state, "S1", "200").await;

    let first = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();

    let err = state
        .engine
        .create(request("S1", "T2", "2025-11-01", "10:30", "11:30", "100"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::ConcurrentBooking(id) if id == first.booking_id));
    assert_eq!(balance(&state, "S1").await, dec("100"));
}

#[tokio::test]
async fn cancelled_slot_can_be_booked_again() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;
    fund(&state, "S2", "100").await;

    let first = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();
    state.engine.cancel(first.booking_id, "S1").await.unwrap();

    let second = state
        .engine
        .create(request("S2", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();
    assert_eq!(second.status, BookingStatus::Pending);
}

#[tokio::test]
async fn cancel_refunds_pending_hold() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let booking = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();
    let cancelled = state.engine.cancel(booking.booking_id, "S1").await.unwrap();

    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(balance(&state, "S1").await, dec("100"));
    assert_eq!(escrow_net(&state, &cancelled).await, Decimal::ZERO);
}

#[tokio::test]
async fn terminal_bookings_refuse_further_transitions() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let booking = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();
    state.engine.cancel(booking.booking_id, "T1").await.unwrap();

    let err = state.engine.accept(booking.booking_id).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::IllegalState(IllegalState::WrongStatus {
            actual: BookingStatus::Cancelled,
            ..
        })
    ));

    let err = state.engine.cancel(booking.booking_id, "S1").await.unwrap_err();
    assert!(matches!(err, BookingError::IllegalState(_)));

    // Exactly one refund.
    assert_eq!(balance(&state, "S1").await, dec("100"));
}

#[tokio::test]
async fn confirmed_booking_cannot_be_cancelled() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let booking = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();
    state.engine.accept(booking.booking_id).await.unwrap();

    let err = state.engine.cancel(booking.booking_id, "S1").await.unwrap_err();
    assert!(matches!(err, BookingError::IllegalState(_)));
    assert_eq!(balance(&state, "S1").await, Decimal::ZERO);
}

#[tokio::test]
async fn concurrent_accepts_release_once() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let booking = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        state.engine.accept(booking.booking_id),
        state.engine.accept(booking.booking_id)
    );

    let outcomes = [first, second];
    let confirmed = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(confirmed, 1, "exactly one accept must win");
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(BookingError::IllegalState(_)))));

    assert_eq!(balance(&state, "T1").await, dec("95"));
    assert_eq!(balance(&state, PLATFORM).await, dec("5"));

    let transactions = state
        .wallet
        .transactions_for_reference(&booking.booking_id.to_string())
        .await
        .unwrap();
    assert_eq!(transactions.len(), 4, "hold + provider + commission + audit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_on_multithreaded_runtime() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let booking = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = state.engine.clone();
            let id = booking.booking_id;
            tokio::spawn(async move { engine.accept(id).await })
        })
        .collect();

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            wins += 1;
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(balance(&state, "T1").await, dec("95"));
}

#[tokio::test]
async fn insufficient_funds_leaves_no_booking() {
    let state = spawn_state();
    fund(&state, "S1", "50").await;

    let err = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InsufficientFunds(ref id) if id == "S1"));

    assert_eq!(balance(&state, "S1").await, dec("50"));
    assert!(state.engine.list_by_requester("S1").await.unwrap().is_empty());
    assert_eq!(
        state.wallet.transaction_history("S1").await.unwrap().len(),
        1,
        "only the funding transaction"
    );
}

#[tokio::test]
async fn invalid_amount_and_slot_are_rejected_up_front() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let err = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "0"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidAmount(_)));

    let err = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "-5"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidAmount(_)));

    let err = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "11:00", "10:00", "10"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidSlot));

    assert_eq!(balance(&state, "S1").await, dec("100"));
}

#[tokio::test]
async fn unknown_booking_is_illegal_state() {
    let state = spawn_state();
    let missing = Uuid::new_v4();

    let err = state.engine.accept(missing).await.unwrap_err();
    assert!(matches!(err, BookingError::IllegalState(IllegalState::NotFound(id)) if id == missing));

    let err = state.engine.get_by_id(missing).await.unwrap_err();
    assert!(matches!(err, BookingError::IllegalState(IllegalState::NotFound(_))));
}

#[tokio::test]
async fn reschedule_reject_restores_original() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let original = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();
    state.engine.accept(original.booking_id).await.unwrap();

    let child = state
        .engine
        .request_reschedule(original.booking_id, slot("2025-11-02", "14:00", "15:00"))
        .await
        .unwrap();
    assert_eq!(child.status, BookingStatus::OnHold);
    assert_eq!(child.original_booking_id, Some(original.booking_id));
    assert_eq!(
        state.engine.get_by_id(original.booking_id).await.unwrap().status,
        BookingStatus::RescheduleRequested
    );

    let restored = state.engine.reject_reschedule(child.booking_id).await.unwrap();
    assert_eq!(restored.booking_id, original.booking_id);
    assert_eq!(restored.status, BookingStatus::Confirmed);
    assert_eq!(
        state.engine.get_by_id(child.booking_id).await.unwrap().status,
        BookingStatus::Rejected
    );

    // Reschedules never move money.
    assert_eq!(balance(&state, "T1").await, dec("95"));
    assert_eq!(balance(&state, "S1").await, Decimal::ZERO);
}

#[tokio::test]
async fn reschedule_approve_moves_the_lesson() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let original = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();
    state.engine.accept(original.booking_id).await.unwrap();

    let child = state
        .engine
        .request_reschedule(original.booking_id, slot("2025-11-01", "10:30", "11:30"))
        .await
        .expect("moving within its own slot is allowed");

    let approved = state.engine.approve_reschedule(child.booking_id).await.unwrap();
    assert_eq!(approved.booking_id, child.booking_id);
    assert_eq!(approved.status, BookingStatus::Confirmed);
    assert_eq!(
        state.engine.get_by_id(original.booking_id).await.unwrap().status,
        BookingStatus::Cancelled
    );

    // Second approval is refused.
    let err = state.engine.approve_reschedule(child.booking_id).await.unwrap_err();
    assert!(matches!(err, BookingError::IllegalState(_)));
    assert_eq!(balance(&state, "T1").await, dec("95"));
}

#[tokio::test]
async fn reschedule_requires_confirmed_booking() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let pending = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();

    let err = state
        .engine
        .request_reschedule(pending.booking_id, slot("2025-11-02", "10:00", "11:00"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BookingError::IllegalState(IllegalState::WrongStatus {
            actual: BookingStatus::Pending,
            ..
        })
    ));
}

#[tokio::test]
async fn reschedule_into_taken_slot_conflicts() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;
    fund(&state, "S2", "100").await;

    let original = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();
    state.engine.accept(original.booking_id).await.unwrap();
    let other = state
        .engine
        .create(request("S2", "T1", "2025-11-01", "13:00", "14:00", "100"))
        .await
        .unwrap();

    let err = state
        .engine
        .request_reschedule(original.booking_id, slot("2025-11-01", "13:30", "14:30"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Conflict(id) if id == other.booking_id));

    // Original untouched.
    assert_eq!(
        state.engine.get_by_id(original.booking_id).await.unwrap().status,
        BookingStatus::Confirmed
    );
}

#[tokio::test]
async fn cancelling_reschedule_child_withdraws_request() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let original = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();
    state.engine.accept(original.booking_id).await.unwrap();
    let child = state
        .engine
        .request_reschedule(original.booking_id, slot("2025-11-03", "09:00", "10:00"))
        .await
        .unwrap();

    let withdrawn = state.engine.cancel(child.booking_id, "S1").await.unwrap();
    assert_eq!(withdrawn.status, BookingStatus::Cancelled);
    assert_eq!(
        state.engine.get_by_id(original.booking_id).await.unwrap().status,
        BookingStatus::Confirmed
    );

    // No refund: the escrow was already released on accept.
    assert_eq!(balance(&state, "S1").await, Decimal::ZERO);
    assert!(state
        .wallet
        .transactions_for_reference(&child.booking_id.to_string())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn approve_on_plain_booking_is_refused() {
    let state = spawn_state();
    fund(&state, "S1", "100").await;

    let booking = state
        .engine
        .create(request("S1", "T1", "2025-11-01", "10:00", "11:00", "100"))
        .await
        .unwrap();

    let err = state.engine.approve_reschedule(booking.booking_id).await.unwrap_err();
    assert!(matches!(err, BookingError::IllegalState(_)));
    assert_eq!(
        state.engine.get_by_id(booking.booking_id).await.unwrap().status,
        BookingStatus::Pending
    );
}

#[tokio::test]
async fn listings_are_chronological() {
    let state = spawn_state();
    fund(&state, "S1", "300").await;

    for (date, start, end, provider) in [
        ("2025-11-03", "09:00", "10:00", "T1"),
        ("2025-11-01", "15:00", "16:00", "T2"),
        ("2025-11-01", "08:00", "09:00", "T1"),
    ] {
        state
            .engine
            .create(request("S1", provider, date, start, end, "100"))
            .await
            .unwrap();
    }

    let mine = state.engine.list_by_requester("S1").await.unwrap();
    let order: Vec<_> = mine.iter().map(|b| (b.date, b.start)).collect();
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);
    assert_eq!(mine.len(), 3);

    let t1_day = state
        .engine
        .list_by_provider("T1", DateFilter::On(day("2025-11-01")))
        .await
        .unwrap();
    assert_eq!(t1_day.len(), 1);

    let t1_range = state
        .engine
        .list_by_provider("T1", DateFilter::Between(day("2025-11-01"), day("2025-11-03")))
        .await
        .unwrap();
    assert_eq!(t1_range.len(), 2);
}

#[tokio::test]
async fn provider_summaries_cap_at_five() {
    let state = spawn_state();
    fund(&state, "S1", "1000").await;
    let today = day("2025-11-10");

    // Seven upcoming sessions and two past ones.
    for offset in 0..7 {
        let date = format!("2025-11-{:02}", 10 + offset);
        let booking = state
            .engine
            .create(request("S1", "T1", &date, "10:00", "11:00", "10"))
            .await
            .unwrap();
        if offset % 2 == 0 {
            state.engine.accept(booking.booking_id).await.unwrap();
        }
    }
    for date in ["2025-11-01", "2025-11-05"] {
        let booking = state
            .engine
            .create(request("S1", "T1", date, "10:00", "11:00", "10"))
            .await
            .unwrap();
        state.engine.accept(booking.booking_id).await.unwrap();
    }

    let upcoming = state.engine.upcoming_for_provider("T1", today).await.unwrap();
    assert_eq!(upcoming.total_count, 7);
    assert_eq!(upcoming.sessions.len(), 5);
    assert_eq!(upcoming.sessions[0].date, today);

    let recent = state.engine.recent_past_for_provider("T1", today).await.unwrap();
    assert_eq!(recent.total_count, 2);
    assert_eq!(recent.sessions[0].date, day("2025-11-05"));
}
