//! Point-in-time reads and change history.

use flowstore::ChangeKind;
use serde_json::json;
use time::Duration;

use crate::support::helpers::{START, TestStore};
use crate::support::models::{cart, loan};

#[tokio::test]
async fn reads_record_as_of_instant() -> anyhow::Result<()> {
    let t = TestStore::new();
    let created = t.store.create(&cart(), json!({"lines": []}), None).await?;
    let t0 = t.now();

    t.tick(10);
    t.store
        .update(created.id, json!({"lines": ["a"]}), Some("create_on_first_add"))
        .await?;
    let t1 = t.now();

    t.tick(10);
    t.store
        .update(created.id, json!({"lines": ["a", "b"]}), Some("add_item"))
        .await?;

    let before = t.store.find_by_id(created.id, Some(t0 - Duration::seconds(1)));
    assert!(before.is_none(), "no record before creation");

    let at_t0 = t.store.find_by_id(created.id, Some(t0)).unwrap();
    assert_eq!(at_t0.state, "initial_state");
    assert_eq!(at_t0.payload, json!({"lines": []}));

    let between = t.store.find_by_id(created.id, Some(t1 + Duration::minutes(5))).unwrap();
    assert_eq!(between.state, "open");
    assert_eq!(between.payload, json!({"lines": ["a"]}));
    assert_eq!(between.created_at, START);
    assert_eq!(between.last_modified_at, t1);

    let now = t.store.find_by_id(created.id, Some(t.now())).unwrap();
    assert_eq!(now, t.store.find_by_id(created.id, None).unwrap());
    Ok(())
}

#[tokio::test]
async fn history_lists_every_change_in_order() -> anyhow::Result<()> {
    let t = TestStore::new();
    let created = t.store.create(&loan(), json!({"loanId": "L-9"}), None).await?;
    t.tick(1);
    t.store.update(created.id, json!({"loanId": "L-9", "note": "x"}), None).await?;
    let mid = t.tick(1);
    t.store.update(created.id, json!({"loanId": "L-9"}), Some("approve")).await?;
    t.tick(1);
    t.store.delete(created.id).await?;

    let history = t.store.change_history(created.id, None);
    let kinds: Vec<_> = history.iter().map(|change| change.kind).collect();
    assert_eq!(
        kinds,
        [ChangeKind::Create, ChangeKind::Update, ChangeKind::Update, ChangeKind::Delete]
    );
    let transitions: Vec<_> = history.iter().map(|c| c.transition.as_deref()).collect();
    assert_eq!(transitions, [None, None, Some("approve"), None]);
    assert!(history.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let until_mid = t.store.change_history(created.id, Some(mid));
    assert_eq!(until_mid.len(), 3);
    assert!(t.store.change_history(created.id, Some(START - Duration::days(1))).is_empty());
    Ok(())
}

#[tokio::test]
async fn tombstone_hides_record_from_later_instants_only() -> anyhow::Result<()> {
    let t = TestStore::new();
    let created = t.store.create(&cart(), json!({"lines": [1]}), None).await?;
    let alive = t.tick(1);
    let deleted_at = t.tick(1);
    t.store.delete(created.id).await?;

    let then = t.store.find_by_id(created.id, Some(alive)).unwrap();
    assert_eq!(then.payload, json!({"lines": [1]}));
    assert!(t.store.find_by_id(created.id, Some(deleted_at)).is_none());
    assert!(t.store.find_by_id(created.id, Some(t.tick(60))).is_none());
    Ok(())
}

#[tokio::test]
async fn backwards_clock_does_not_reorder_history() -> anyhow::Result<()> {
    let t = TestStore::new();
    let created = t.store.create(&cart(), json!({"v": 1}), None).await?;
    let later = t.tick(30);
    t.store.update(created.id, json!({"v": 2}), None).await?;

    // Wall clock steps back before the last change.
    t.clock.set(START);
    let outcome = t.store.update(created.id, json!({"v": 3}), None).await?;
    assert_eq!(outcome.change.timestamp, later);

    let latest = t.store.find_by_id(created.id, Some(later)).unwrap();
    assert_eq!(latest.payload, json!({"v": 3}));
    let history = t.store.change_history(created.id, None);
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    Ok(())
}

#[tokio::test]
async fn sequences_are_global_across_entities() -> anyhow::Result<()> {
    let t = TestStore::new();
    let a = t.store.create(&cart(), json!({}), None).await?;
    let b = t.store.create(&loan(), json!({"loanId": "L-1"}), None).await?;
    let a2 = t.store.update(a.id, json!({"x": 1}), None).await?;

    let seqs = [a.changes[0].sequence, b.changes[0].sequence, a2.change.sequence];
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "sequences {seqs:?}");
    Ok(())
}
