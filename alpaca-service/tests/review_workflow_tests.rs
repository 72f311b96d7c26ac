//! Review workflow scenarios over the in-memory stack.
//!
//! Covers the record state machine end to end: submission, owner edits and
//! deletes while pending, administrator review, and the guards that make
//! APPROVED and REJECTED terminal.

#[path = "support/harness.rs"]
mod harness;

use std::time::Duration;

use alpaca_core::{RecordFilter, RecordStatus, StatusCode};
use alpaca_service::{
    ErrorCode, ListRecordsRequest, RequestContext, UpdateRecordRequest,
};
use alpaca_storage::InstructionStore;
use harness::{submission, ServiceHarness};
use tokio_util::sync::CancellationToken;

fn output_edit(output: &str) -> UpdateRecordRequest {
    UpdateRecordRequest {
        output: Some(output.to_string()),
        ..UpdateRecordRequest::default()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn submit_then_approve() {
    let h = ServiceHarness::new();
    let record = h
        .review
        .submit(&h.as_alice(), submission("Add 1+1", "2"))
        .await
        .expect("submit should succeed");
    assert_eq!(record.status, RecordStatus::pending());

    let approved = h
        .review
        .approve(&h.as_admin(), record.record_id)
        .await
        .expect("approve should succeed");
    assert_eq!(approved.status.code, StatusCode::Approved);
    assert_eq!(approved.status.message, "");

    let listed = h
        .review
        .admin_list(
            &h.as_admin(),
            ListRecordsRequest {
                status_code: Some(StatusCode::Approved),
                ..ListRecordsRequest::default()
            },
        )
        .await
        .expect("list should succeed");
    assert_eq!(listed.total, 1);
    assert_eq!(listed.items[0].record_id, record.record_id);
}

#[tokio::test]
async fn rejected_record_cannot_be_edited_by_owner() {
    let h = ServiceHarness::new();
    let record = h
        .review
        .submit(&h.as_alice(), submission("Add 1+1", "3"))
        .await
        .expect("submit should succeed");

    let rejected = h
        .review
        .reject(&h.as_admin(), record.record_id, "wrong answer")
        .await
        .expect("reject should succeed");
    assert_eq!(rejected.status, RecordStatus::rejected("wrong answer"));

    let err = h
        .review
        .update(&h.as_alice(), record.record_id, output_edit("2"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDeny);

    let unchanged = h
        .review
        .get(&h.as_alice(), record.record_id)
        .await
        .expect("get should succeed");
    assert_eq!(unchanged.output, "3");
    assert_eq!(unchanged.status, RecordStatus::rejected("wrong answer"));
}

// ============================================================================
// Terminal states
// ============================================================================

#[tokio::test]
async fn approve_rejects_if_not_pending() {
    let h = ServiceHarness::new();
    let admin = h.as_admin();
    for terminal in [StatusCode::Approved, StatusCode::Rejected] {
        let record = h
            .review
            .submit(&h.as_alice(), submission("Name a prime", "7"))
            .await
            .expect("submit should succeed");
        let first = match terminal {
            StatusCode::Approved => h.review.approve(&admin, record.record_id).await,
            _ => h.review.reject(&admin, record.record_id, "no").await,
        };
        first.expect("first review should succeed");

        let err = h
            .review
            .approve(&admin, record.record_id)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::StateConflict);

        let current = h
            .review
            .admin_get(&admin, record.record_id)
            .await
            .expect("get should succeed");
        assert_eq!(current.status.code, terminal);
    }
}

#[tokio::test]
async fn reject_rejects_if_not_pending() {
    let h = ServiceHarness::new();
    let admin = h.as_admin();
    for terminal in [StatusCode::Approved, StatusCode::Rejected] {
        let record = h
            .review
            .submit(&h.as_alice(), submission("Name a prime", "7"))
            .await
            .expect("submit should succeed");
        let first = match terminal {
            StatusCode::Approved => h.review.approve(&admin, record.record_id).await,
            _ => h.review.reject(&admin, record.record_id, "first").await,
        };
        first.expect("first review should succeed");

        let err = h
            .review
            .reject(&admin, record.record_id, "second")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::StateConflict);

        let current = h
            .review
            .admin_get(&admin, record.record_id)
            .await
            .expect("get should succeed");
        assert_ne!(current.status.message, "second");
    }
}

#[tokio::test]
async fn review_of_missing_record_is_not_found() {
    let h = ServiceHarness::new();
    let err = h
        .review
        .approve(&h.as_admin(), uuid::Uuid::now_v7())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

// ============================================================================
// Owner guards
// ============================================================================

#[tokio::test]
async fn owner_can_edit_and_delete_while_pending() {
    let h = ServiceHarness::new();
    let alice = h.as_alice();
    let record = h
        .review
        .submit(&alice, submission("Add 2+2", "5"))
        .await
        .expect("submit should succeed");

    let edited = h
        .review
        .update(&alice, record.record_id, output_edit("4"))
        .await
        .expect("update should succeed");
    assert_eq!(edited.output, "4");
    assert_eq!(edited.status, RecordStatus::pending());

    h.review
        .delete(&alice, record.record_id)
        .await
        .expect("delete should succeed");
}

#[tokio::test]
async fn owner_can_set_and_clear_note() {
    let h = ServiceHarness::new();
    let alice = h.as_alice();
    let record = h
        .review
        .submit(&alice, submission("Add 3+3", "6"))
        .await
        .expect("submit should succeed");

    let noted = h
        .review
        .update(
            &alice,
            record.record_id,
            UpdateRecordRequest {
                note: Some("from chapter 2".to_string()),
                ..UpdateRecordRequest::default()
            },
        )
        .await
        .expect("update should succeed");
    assert_eq!(noted.note.as_deref(), Some("from chapter 2"));

    let conflicting = h
        .review
        .update(
            &alice,
            record.record_id,
            UpdateRecordRequest {
                note: Some("other".to_string()),
                clear_note: true,
                ..UpdateRecordRequest::default()
            },
        )
        .await
        .expect_err("note with clear_note should fail");
    assert_eq!(conflicting.code, ErrorCode::ValidationFailed);

    let cleared = h
        .review
        .update(
            &alice,
            record.record_id,
            UpdateRecordRequest {
                clear_note: true,
                ..UpdateRecordRequest::default()
            },
        )
        .await
        .expect("update should succeed");
    assert_eq!(cleared.note, None);
    assert_eq!(cleared.output, "6");
}

#[tokio::test]
async fn owner_delete_of_approved_record_is_denied() {
    let h = ServiceHarness::new();
    let record = h
        .review
        .submit(&h.as_alice(), submission("Add 2+2", "4"))
        .await
        .expect("submit should succeed");
    h.review
        .approve(&h.as_admin(), record.record_id)
        .await
        .expect("approve should succeed");

    let err = h
        .review
        .delete(&h.as_alice(), record.record_id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDeny);
}

#[tokio::test]
async fn non_owner_cannot_edit_or_delete() {
    let h = ServiceHarness::new();
    let record = h
        .review
        .submit(&h.as_alice(), submission("Add 2+2", "4"))
        .await
        .expect("submit should succeed");

    let bob = h.as_bob();
    let err = h
        .review
        .update(&bob, record.record_id, output_edit("5"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDeny);
    let err = h.review.delete(&bob, record.record_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDeny);
}

#[tokio::test]
async fn anonymous_callers_are_not_authorized() {
    let h = ServiceHarness::new();
    let anonymous = RequestContext::anonymous();
    let err = h
        .review
        .list(&anonymous, ListRecordsRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotAuthorized);
    let err = h
        .review
        .export_all(&anonymous, ListRecordsRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotAuthorized);
}

// ============================================================================
// Soft delete visibility
// ============================================================================

#[tokio::test]
async fn soft_deleted_record_disappears_from_every_read() {
    let h = ServiceHarness::new();
    let alice = h.as_alice();
    let record = h
        .review
        .submit(&alice, submission("Add 3+3", "6"))
        .await
        .expect("submit should succeed");

    // Warm the list cache first so the delete has to invalidate it.
    let before = h
        .review
        .list(&alice, ListRecordsRequest::default())
        .await
        .expect("list should succeed");
    assert_eq!(before.total, 1);

    h.review
        .delete(&alice, record.record_id)
        .await
        .expect("delete should succeed");

    let err = h.review.get(&alice, record.record_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    let after = h
        .review
        .list(&alice, ListRecordsRequest::default())
        .await
        .expect("list should succeed");
    assert_eq!(after.total, 0);
    assert!(after.items.is_empty());
    let count = h
        .stack
        .repo
        .count(&RecordFilter::owned_by(h.alice.user_id))
        .await
        .expect("count should succeed");
    assert_eq!(count, 0);

    // A second delete finds nothing.
    let err = h.review.delete(&alice, record.record_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    // The row is still stored, only hidden.
    assert!(h.stack.store.raw(record.record_id).is_some());
    assert!(h
        .stack
        .store
        .find_by_id(record.record_id)
        .await
        .expect("find should succeed")
        .is_none());
}

// ============================================================================
// Exports
// ============================================================================

#[tokio::test]
async fn exports_are_unpaginated_and_scoped() {
    let h = ServiceHarness::new();
    for i in 0..30 {
        h.review
            .submit(&h.as_alice(), submission(&format!("Count to {}", i), "ok"))
            .await
            .expect("submit should succeed");
    }
    h.review
        .submit(&h.as_bob(), submission("Say hi", "hi"))
        .await
        .expect("submit should succeed");

    let request = ListRecordsRequest {
        offset: 10,
        limit: Some(5),
        ..ListRecordsRequest::default()
    };
    let mine = h
        .review
        .export_triples(&h.as_alice(), request.clone())
        .await
        .expect("export should succeed");
    assert_eq!(mine.len(), 30);
    assert!(mine.iter().all(|t| t.output == "ok"));

    let everything = h
        .review
        .export_all(&h.as_admin(), request)
        .await
        .expect("export should succeed");
    assert_eq!(everything.len(), 31);
}

#[tokio::test]
async fn admin_purge_removes_matching_records() {
    let h = ServiceHarness::new();
    h.review
        .submit(&h.as_alice(), submission("Add 1+1", "2"))
        .await
        .expect("submit should succeed");
    h.review
        .submit(&h.as_bob(), submission("Add 1+2", "3"))
        .await
        .expect("submit should succeed");

    let removed = h
        .review
        .admin_purge(
            &h.as_admin(),
            ListRecordsRequest {
                owner_id: Some(h.bob.user_id),
                ..ListRecordsRequest::default()
            },
        )
        .await
        .expect("purge should succeed");
    assert_eq!(removed, 1);

    let remaining = h
        .review
        .admin_list(&h.as_admin(), ListRecordsRequest::default())
        .await
        .expect("list should succeed");
    assert_eq!(remaining.total, 1);
    assert_eq!(remaining.items[0].username, "alice");
}

#[tokio::test]
async fn backend_outage_is_operation_failed() {
    let h = ServiceHarness::new();
    h.stack.store.set_unavailable(true);
    let err = h
        .review
        .submit(&h.as_alice(), submission("Add 1+1", "2"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::OperationFailed);
}

#[tokio::test]
async fn cache_outage_does_not_fail_requests() {
    let h = ServiceHarness::new();
    h.stack.cache.set_unavailable(true);
    h.review
        .submit(&h.as_alice(), submission("Add 1+1", "2"))
        .await
        .expect("submit should succeed");
    let listed = h
        .review
        .list(&h.as_alice(), ListRecordsRequest::default())
        .await
        .expect("list should succeed");
    assert_eq!(listed.total, 1);
}

// ============================================================================
// Abandoned writes
// ============================================================================

#[tokio::test]
async fn timed_out_submit_still_invalidates_lists() {
    let h = ServiceHarness::new();
    let alice = h.as_alice();
    h.review
        .submit(&alice, submission("Add 1+1", "2"))
        .await
        .expect("submit should succeed");
    let before = h
        .review
        .list(&alice, ListRecordsRequest::default())
        .await
        .expect("list should succeed");
    assert_eq!(before.total, 1);

    h.stack.cache.set_flush_delay(Duration::from_millis(200));
    let err = h
        .review
        .submit(
            &alice.clone().with_timeout(Duration::from_millis(50)),
            submission("Add 2+2", "4"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::OperationFailed);
    assert_eq!(h.stack.store.len(), 2);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let after = h
        .review
        .list(&alice, ListRecordsRequest::default())
        .await
        .expect("list should succeed");
    assert_eq!(after.total, 2);
}

#[tokio::test]
async fn cancelled_approve_still_invalidates_lists() {
    let h = ServiceHarness::new();
    let admin = h.as_admin();
    let record = h
        .review
        .submit(&h.as_alice(), submission("Add 1+1", "2"))
        .await
        .expect("submit should succeed");
    let pending = ListRecordsRequest {
        status_code: Some(StatusCode::Pending),
        ..ListRecordsRequest::default()
    };
    let before = h
        .review
        .admin_list(&admin, pending.clone())
        .await
        .expect("list should succeed");
    assert_eq!(before.total, 1);

    h.stack.cache.set_flush_delay(Duration::from_millis(200));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = h
        .review
        .approve(&admin.clone().with_cancellation(cancel), record.record_id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::OperationFailed);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let after = h
        .review
        .admin_list(&admin, pending)
        .await
        .expect("list should succeed");
    assert_eq!(after.total, 0);
    let current = h
        .review
        .admin_get(&admin, record.record_id)
        .await
        .expect("get should succeed");
    assert_eq!(current.status.code, StatusCode::Approved);
}
