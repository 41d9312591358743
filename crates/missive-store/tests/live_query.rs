//! Live query controller: incremental diffs, windowed refresh, close.

#![allow(missing_docs, unused_results)]

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use parking_lot::Mutex;

use common::{Message, open_store};
use missive_store::{
    FetchRequest, LiveObserver, Model, Predicate, ResultChange, SortKey, StoreError,
};

/// Records every diff as a compact string, e.g. `insert@1:m2` or `move:1->2:m2`.
#[derive(Default)]
struct DiffLog {
    diffs: Mutex<Vec<String>>,
    brackets: Mutex<u32>,
    errors: Mutex<Vec<String>>,
}

impl DiffLog {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.diffs.lock())
    }
}

impl LiveObserver<Message> for DiffLog {
    fn on_will_change(&self) {
        *self.brackets.lock() += 1;
    }

    fn on_change(&self, change: &ResultChange<Message>) {
        let line = match change {
            ResultChange::Insert { index, record } => format!("insert@{index}:{}", record.id()),
            ResultChange::Delete { index, record } => format!("delete@{index}:{}", record.id()),
            ResultChange::Move { from, to, record } => {
                format!("move:{from}->{to}:{}", record.id())
            }
            ResultChange::Update { index, record } => format!("update@{index}:{}", record.id()),
        };
        self.diffs.lock().push(line);
    }

    fn on_did_change(&self) {
        *self.brackets.lock() -= 1;
    }

    fn on_error(&self, error: &StoreError) {
        self.errors.lock().push(error.to_string());
    }
}

fn chat_request() -> FetchRequest {
    FetchRequest::matching(Predicate::eq("chat", "c1")).sorted_by(vec![SortKey::asc("sent")])
}

fn ids(live: &missive_store::LiveResults<Message>) -> Vec<String> {
    live.ids()
        .unwrap()
        .into_iter()
        .map(|id| id.to_string())
        .collect()
}

#[test]
fn execute_materializes_in_sort_order() {
    let (_dir, store) = open_store();
    let messages = store.record_store::<Message>().unwrap();
    messages.insert(Message::text("a", "c1", 10, "A")).unwrap();
    messages.insert(Message::text("b", "c1", 20, "B")).unwrap();
    messages.insert(Message::text("x", "c2", 5, "other chat")).unwrap();

    let live = store.live_query::<Message>(chat_request()).unwrap();
    assert_eq!(live.execute().unwrap(), 2);
    assert_eq!(ids(&live), ["a", "b"]);
    assert_eq!(live.object_at(1).unwrap().id().as_str(), "b");
}

#[test]
fn insert_lands_at_its_sorted_position() {
    let (_dir, store) = open_store();
    let messages = store.record_store::<Message>().unwrap();
    messages.insert(Message::text("a", "c1", 10, "A")).unwrap();
    messages.insert(Message::text("c", "c1", 30, "C")).unwrap();

    let live = store.live_query::<Message>(chat_request()).unwrap();
    let log = Arc::new(DiffLog::default());
    live.set_observer(log.clone());
    live.execute().unwrap();

    messages.insert(Message::text("b", "c1", 20, "B")).unwrap();
    assert_eq!(log.take(), ["insert@1:b"]);
    assert_eq!(ids(&live), ["a", "b", "c"]);

    // A non-matching insert produces no diff.
    messages.insert(Message::text("y", "c2", 1, "Y")).unwrap();
    assert!(log.take().is_empty());
}

#[test]
fn update_moving_past_a_neighbor_emits_one_move() {
    let (_dir, store) = open_store();
    let messages = store.record_store::<Message>().unwrap();
    let b = Message::text("b", "c1", 20, "B");
    messages.insert(Message::text("a", "c1", 10, "A")).unwrap();
    messages.insert(b.clone()).unwrap();
    messages.insert(Message::text("c", "c1", 30, "C")).unwrap();

    let live = store.live_query::<Message>(chat_request()).unwrap();
    let log = Arc::new(DiffLog::default());
    live.set_observer(log.clone());
    live.execute().unwrap();
    assert_eq!(ids(&live), ["a", "b", "c"]);

    // Move B's sort key past C: exactly one Move(1, 2).
    messages.update(b.with_sent(40)).unwrap();
    assert_eq!(log.take(), ["move:1->2:b"]);
    assert_eq!(ids(&live), ["a", "c", "b"]);

    // Every will-change was balanced by a did-change, and nothing errored.
    assert_eq!(*log.brackets.lock(), 0);
    assert!(log.errors.lock().is_empty());
}

#[test]
fn update_in_place_emits_update() {
    let (_dir, store) = open_store();
    let messages = store.record_store::<Message>().unwrap();
    let a = Message::text("a", "c1", 10, "A");
    messages.insert(a.clone()).unwrap();
    messages.insert(Message::text("b", "c1", 20, "B")).unwrap();

    let live = store.live_query::<Message>(chat_request()).unwrap();
    let log = Arc::new(DiffLog::default());
    live.set_observer(log.clone());
    live.execute().unwrap();

    // Same position, new content.
    messages.update(Message::text("a", "c1", 10, "A, edited")).unwrap();
    assert_eq!(log.take(), ["update@0:a"]);
    assert_eq!(ids(&live), ["a", "b"]);

    // The row cache serves the updated instance.
    match &*live.object_at(0).unwrap() {
        Message::Text(m) => assert_eq!(m.body, "A, edited"),
        other => panic!("wrong variant: {other:?}"),
    }
}

#[test]
fn update_out_of_predicate_degrades_to_delete() {
    let (_dir, store) = open_store();
    let messages = store.record_store::<Message>().unwrap();
    let a = Message::text("a", "c1", 10, "A");
    messages.insert(a.clone()).unwrap();
    messages.insert(Message::text("b", "c1", 20, "B")).unwrap();

    let live = store.live_query::<Message>(chat_request()).unwrap();
    let log = Arc::new(DiffLog::default());
    live.set_observer(log.clone());
    live.execute().unwrap();

    // Moving to another chat leaves the predicate.
    messages.update(a.with_chat("c2")).unwrap();
    assert_eq!(log.take(), ["delete@0:a"]);
    assert_eq!(ids(&live), ["b"]);

    // And coming back degrades to insert.
    messages.update(a.clone()).unwrap();
    assert_eq!(log.take(), ["insert@0:a"]);
    assert_eq!(ids(&live), ["a", "b"]);
}

#[test]
fn delete_emits_delete_at_old_index() {
    let (_dir, store) = open_store();
    let messages = store.record_store::<Message>().unwrap();
    let b = Message::text("b", "c1", 20, "B");
    messages.insert(Message::text("a", "c1", 10, "A")).unwrap();
    messages.insert(b.clone()).unwrap();

    let live = store.live_query::<Message>(chat_request()).unwrap();
    let log = Arc::new(DiffLog::default());
    live.set_observer(log.clone());
    live.execute().unwrap();

    messages.delete(&b).unwrap();
    assert_eq!(log.take(), ["delete@1:b"]);
    assert_eq!(ids(&live), ["a"]);
}

#[test]
fn diffs_cover_derived_tables_too() {
    let (_dir, store) = open_store();
    let messages = store.record_store::<Message>().unwrap();
    messages.insert(Message::text("a", "c1", 10, "A")).unwrap();

    let live = store.live_query::<Message>(chat_request()).unwrap();
    let log = Arc::new(DiffLog::default());
    live.set_observer(log.clone());
    live.execute().unwrap();

    messages.insert(Message::video("v", "c1", 5, 64)).unwrap();
    assert_eq!(log.take(), ["insert@0:v"]);
    assert_eq!(ids(&live), ["v", "a"]);
}

#[test]
fn windowed_request_refreshes_membership() {
    let (_dir, store) = open_store();
    let messages = store.record_store::<Message>().unwrap();
    for (id, sent) in [("a", 10), ("b", 20), ("c", 30)] {
        messages.insert(Message::text(id, "c1", sent, id)).unwrap();
    }

    let mut request = chat_request();
    request.limit = Some(2);
    let live = store.live_query::<Message>(request).unwrap();
    let log = Arc::new(DiffLog::default());
    live.set_observer(log.clone());
    live.execute().unwrap();
    assert_eq!(ids(&live), ["a", "b"]);

    // A new head pushes "b" out of the window.
    messages.insert(Message::text("_first", "c1", 1, "first")).unwrap();
    let diffs = log.take();
    assert_eq!(diffs, ["delete@1:b", "insert@0:_first"]);
    assert_eq!(ids(&live), ["_first", "a"]);
}

#[test]
fn close_cancels_delivery_and_rejects_access() {
    let (_dir, store) = open_store();
    let messages = store.record_store::<Message>().unwrap();
    messages.insert(Message::text("a", "c1", 10, "A")).unwrap();

    let live = store.live_query::<Message>(chat_request()).unwrap();
    let log = Arc::new(DiffLog::default());
    live.set_observer(log.clone());
    live.execute().unwrap();

    live.close();
    messages.insert(Message::text("b", "c1", 20, "B")).unwrap();
    assert!(log.take().is_empty());

    assert_matches!(live.execute(), Err(StoreError::ControllerClosed));
    assert_matches!(live.object_at(0), Err(StoreError::ControllerClosed));
    assert_matches!(live.len(), Err(StoreError::ControllerClosed));
}

#[test]
fn closing_one_controller_leaves_others_running() {
    let (_dir, store) = open_store();
    let messages = store.record_store::<Message>().unwrap();
    messages.insert(Message::text("a", "c1", 10, "A")).unwrap();

    let first = store.live_query::<Message>(chat_request()).unwrap();
    let second = store.live_query::<Message>(chat_request()).unwrap();
    let first_log = Arc::new(DiffLog::default());
    let second_log = Arc::new(DiffLog::default());
    first.set_observer(first_log.clone());
    second.set_observer(second_log.clone());
    first.execute().unwrap();
    second.execute().unwrap();

    first.close();
    messages.insert(Message::text("b", "c1", 20, "B")).unwrap();

    assert!(first_log.take().is_empty());
    assert_eq!(second_log.take(), ["insert@1:b"]);
}
