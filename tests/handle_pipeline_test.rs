mod common;

use common::*;
use msgqueue_engine::{
    queue::{Direction, EntryState, Outcome},
    ComponentId, ComponentRegistry, RunOutcome,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_each_changed_row_is_saved() {
    let store = RecordingStore::new();
    let handler = Arc::new(ScriptedComponent::new("ledger", |message, _| {
        if message.id % 2 == 0 {
            Behavior::Claim(Outcome::Completed, None)
        } else {
            Behavior::Decline
        }
    }));
    let mut registry = ComponentRegistry::<OrderPlaced>::new();
    registry.register_handler(handler.clone(), 0).unwrap();
    let (service, _, _) = build_service("orders", store.clone(), registry, test_settings());
    seed(store.as_ref(), Direction::Inbound, 1..=6).await;

    let report = service.run_handle().await;

    assert_eq!(report.stats.examined, 6);
    assert_eq!(report.stats.completed, 3);
    assert_eq!(report.stats.unclaimed, 3);
    assert_eq!(store.saves.load(Ordering::SeqCst), 3);
    assert!(store.commit_sizes().is_empty());

    let by_id = rows_by_message(store.as_ref()).await;
    assert_eq!(by_id[&2].state, EntryState::Complete);
    assert_eq!(by_id[&3].state, EntryState::NotProcessed);
}

#[tokio::test]
async fn test_handler_repeat_binding() {
    let store = RecordingStore::new();
    let primary = Arc::new(ScriptedComponent::new("primary", |_, continuation| {
        match continuation {
            Some("step-2") => Behavior::Claim(Outcome::Completed, None),
            _ => Behavior::Claim(Outcome::Repeat, Some("step-2".to_string())),
        }
    }));
    let secondary = Arc::new(ScriptedComponent::always(
        "secondary",
        Behavior::Claim(Outcome::Completed, None),
    ));
    let mut registry = ComponentRegistry::<OrderPlaced>::new();
    registry.register_handler(primary.clone(), 0).unwrap();
    registry.register_handler(secondary.clone(), 1).unwrap();
    let (service, _, _) = build_service("orders", store.clone(), registry, test_settings());

    assert!(service.enqueue_inbound(&order(1)).await);

    service.run_handle().await;
    let row = &rows(store.as_ref()).await[0];
    assert_eq!(row.state, EntryState::Repeat);
    assert_eq!(row.bound_handler, Some(ComponentId::new("primary")));

    service.run_handle().await;
    assert_eq!(states(store.as_ref()).await, vec![EntryState::Complete]);
    assert_eq!(primary.call_count(), 2);
    assert_eq!(secondary.call_count(), 0);
}

#[tokio::test]
async fn test_outbound_rows_are_not_handled() {
    let store = RecordingStore::new();
    let handler = Arc::new(ScriptedComponent::always(
        "ledger",
        Behavior::Claim(Outcome::Completed, None),
    ));
    let mut registry = ComponentRegistry::<OrderPlaced>::new();
    registry.register_handler(handler.clone(), 0).unwrap();
    let (service, _, _) = build_service("orders", store.clone(), registry, test_settings());

    service.enqueue_outbound(&order(1)).await;
    let report = service.run_handle().await;

    assert_eq!(report.stats.examined, 0);
    assert_eq!(handler.call_count(), 0);
}

#[tokio::test]
async fn test_failed_save_aborts_run() {
    let store = RecordingStore::new();
    let handler = Arc::new(ScriptedComponent::always(
        "ledger",
        Behavior::Claim(Outcome::Completed, None),
    ));
    let mut registry = ComponentRegistry::<OrderPlaced>::new();
    registry.register_handler(handler.clone(), 0).unwrap();
    let (service, _, _) = build_service("orders", store.clone(), registry, test_settings());
    seed(store.as_ref(), Direction::Inbound, [1, 2]).await;

    store.fail_commits.store(true, Ordering::SeqCst);
    let report = service.run_handle().await;

    assert!(matches!(report.outcome, RunOutcome::Failed(_)));
    assert_eq!(handler.call_count(), 1);
    assert_eq!(
        states(store.as_ref()).await,
        vec![EntryState::NotProcessed, EntryState::NotProcessed]
    );
}
