use recordsync_storage::{Database, OperationQueue};
use recordsync_types::{into_fields, LocalId, OperationId, OperationKind, OperationPayload};
use serde_json::json;

fn create(local_id: LocalId) -> OperationPayload {
    OperationPayload::Create {
        local_id,
        fields: into_fields(json!({"title": "X"})).unwrap(),
    }
}

fn delete(id: &str) -> OperationPayload {
    OperationPayload::Delete { id: id.into() }
}

#[test]
fn enqueue_starts_with_zero_attempts() {
    let queue = OperationQueue::open_in_memory().unwrap();
    let op = queue.enqueue(delete("a")).unwrap();

    assert_eq!(op.attempts, 0);
    assert_eq!(op.kind(), OperationKind::Delete);
    assert_eq!(queue.len().unwrap(), 1);
}

#[test]
fn get_all_is_in_enqueue_order() {
    let queue = OperationQueue::open_in_memory().unwrap();
    let ids: Vec<OperationId> = (0..20)
        .map(|i| queue.enqueue(delete(&format!("r{i}"))).unwrap().id)
        .collect();

    let ops = queue.get_all().unwrap();
    assert_eq!(ops.iter().map(|op| op.id).collect::<Vec<_>>(), ids);
    for pair in ops.windows(2) {
        assert!(pair[0].enqueued_at < pair[1].enqueued_at);
    }
}

#[test]
fn payload_round_trips() {
    let queue = OperationQueue::open_in_memory().unwrap();
    let local = LocalId::new();
    queue.enqueue(create(local)).unwrap();

    let ops = queue.get_all().unwrap();
    assert_eq!(ops[0].payload, create(local));
}

#[test]
fn dequeue_is_idempotent() {
    let queue = OperationQueue::open_in_memory().unwrap();
    let op = queue.enqueue(delete("a")).unwrap();

    queue.dequeue(op.id).unwrap();
    queue.dequeue(op.id).unwrap();
    assert!(queue.is_empty().unwrap());
    assert!(!queue.contains(op.id).unwrap());
}

#[test]
fn dequeue_leaves_others_in_order() {
    let queue = OperationQueue::open_in_memory().unwrap();
    let a = queue.enqueue(delete("a")).unwrap();
    let b = queue.enqueue(delete("b")).unwrap();
    let c = queue.enqueue(delete("c")).unwrap();

    queue.dequeue(b.id).unwrap();

    let remaining: Vec<_> = queue.get_all().unwrap().into_iter().map(|op| op.id).collect();
    assert_eq!(remaining, vec![a.id, c.id]);
}

#[test]
fn increment_attempts_persists() {
    let queue = OperationQueue::open_in_memory().unwrap();
    let op = queue.enqueue(delete("a")).unwrap();

    queue.increment_attempts(op.id).unwrap();
    queue.increment_attempts(op.id).unwrap();

    assert_eq!(queue.get_all().unwrap()[0].attempts, 2);
}

#[test]
fn increment_attempts_on_missing_is_noop() {
    let queue = OperationQueue::open_in_memory().unwrap();
    queue.increment_attempts(OperationId::new(999)).unwrap();
}

#[test]
fn remove_creates_for_targets_one_record() {
    let queue = OperationQueue::open_in_memory().unwrap();
    let doomed = LocalId::new();
    let kept = LocalId::new();
    queue.enqueue(create(doomed)).unwrap();
    queue.enqueue(create(kept)).unwrap();
    queue.enqueue(delete("x")).unwrap();

    assert_eq!(queue.remove_creates_for(doomed).unwrap(), 1);

    let kinds: Vec<_> = queue.get_all().unwrap().iter().map(|op| op.payload.clone()).collect();
    assert_eq!(kinds, vec![create(kept), delete("x")]);
}

#[test]
fn clear_empties_queue() {
    let queue = OperationQueue::open_in_memory().unwrap();
    queue.enqueue(delete("a")).unwrap();
    queue.enqueue(delete("b")).unwrap();
    queue.clear().unwrap();
    assert_eq!(queue.len().unwrap(), 0);
}

#[test]
fn failure_ledger_records_and_dismisses() {
    let queue = OperationQueue::open_in_memory().unwrap();
    let op = queue.enqueue(delete("a")).unwrap();

    let notice = queue.record_failure(&op, "title is required").unwrap();
    let failures = queue.failures().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].operation, op);
    assert_eq!(failures[0].error, "title is required");

    assert!(queue.dismiss_failure(notice.id).unwrap());
    assert!(!queue.dismiss_failure(notice.id).unwrap());
    assert!(queue.failures().unwrap().is_empty());
}

#[test]
fn queue_survives_reopen_and_keeps_ordering() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let first = {
        let db = Database::open(&path).unwrap();
        let queue = db.queue().unwrap();
        let first = queue.enqueue(delete("a")).unwrap();
        queue.increment_attempts(first.id).unwrap();
        first
    };

    let db = Database::open(&path).unwrap();
    let queue = db.queue().unwrap();
    let second = queue.enqueue(delete("b")).unwrap();
    assert!(second.enqueued_at > first.enqueued_at);

    let ops = queue.get_all().unwrap();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].id, first.id);
    assert_eq!(ops[0].attempts, 1);
    assert_eq!(ops[1].id, second.id);
}

#[test]
fn records_and_queue_share_one_database() {
    let db = Database::open_in_memory().unwrap();
    let queue = db.queue().unwrap();
    queue.enqueue(delete("a")).unwrap();

    // A second handle sees the same rows.
    assert_eq!(db.queue().unwrap().len().unwrap(), 1);
    assert_eq!(db.records().count().unwrap(), 0);
}

#[test]
fn has_pending_for_ignores_creates_and_other_records() {
    let queue = OperationQueue::open_in_memory().unwrap();
    queue.enqueue(create(LocalId::new())).unwrap();
    queue
        .enqueue(OperationPayload::Update {
            id: "a".into(),
            fields: into_fields(json!({"v": 1})).unwrap(),
        })
        .unwrap();

    assert!(queue.has_pending_for(&"a".into()).unwrap());
    assert!(!queue.has_pending_for(&"b".into()).unwrap());

    queue.enqueue(delete("b")).unwrap();
    assert!(queue.has_pending_for(&"b".into()).unwrap());
}
