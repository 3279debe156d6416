//! Create, update, transition and delete through the store.

use flowstore::{ChangeKind, Error, TechnicalId};
use serde_json::json;

use crate::support::helpers::{START, TestStore};
use crate::support::models::{cart, data_source, loan};

#[tokio::test]
async fn cart_opens_on_first_add() -> anyhow::Result<()> {
    let t = TestStore::new();

    let created = t.store.create(&cart(), json!({"lines": []}), None).await?;
    assert_eq!(created.state, "initial_state");
    assert_eq!(created.changes.len(), 1);
    assert_eq!(created.changes[0].kind, ChangeKind::Create);
    assert_eq!(created.changes[0].transition, None);

    t.tick(1);
    let updated = t
        .store
        .update(
            created.id,
            json!({"lines": [{"sku": "A", "qty": 1}]}),
            Some("create_on_first_add"),
        )
        .await?;
    assert_eq!(updated.state, "open");
    assert_eq!(updated.change.transition.as_deref(), Some("create_on_first_add"));
    assert!(updated.change.sequence > created.changes[0].sequence);

    let record = t.store.find_by_id(created.id, None).expect("cart is live");
    assert_eq!(record.state, "open");
    assert_eq!(record.payload["lines"][0]["sku"], "A");
    assert_eq!(record.created_at, START);
    assert_eq!(record.last_modified_at, t.now());
    Ok(())
}

#[tokio::test]
async fn unknown_transition_leaves_record_untouched() -> anyhow::Result<()> {
    let t = TestStore::new();
    let created = t.store.create(&cart(), json!({"lines": []}), None).await?;

    let err = t
        .store
        .update(created.id, json!({"lines": ["x"]}), Some("fly_to_moon"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownTransition { ref transition, .. } if transition == "fly_to_moon"));
    assert!(err.is_client_error());

    let record = t.store.find_by_id(created.id, None).expect("cart is live");
    assert_eq!(record.state, "initial_state");
    assert_eq!(record.payload, json!({"lines": []}));
    assert_eq!(t.store.change_history(created.id, None).len(), 1);
    Ok(())
}

#[tokio::test]
async fn transition_from_wrong_state_is_illegal() -> anyhow::Result<()> {
    let t = TestStore::new();
    let created = t.store.create(&cart(), json!({"lines": []}), None).await?;

    let err = t
        .store
        .update(created.id, json!({"lines": []}), Some("checkout"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::IllegalTransition { ref state, .. } if state == "initial_state"
    ));
    Ok(())
}

#[tokio::test]
async fn update_without_transition_keeps_state() -> anyhow::Result<()> {
    let t = TestStore::new();
    let created = t.store.create(&cart(), json!({"lines": []}), None).await?;
    t.store
        .update(created.id, json!({"lines": [1]}), Some("create_on_first_add"))
        .await?;

    let updated = t.store.update(created.id, json!({"lines": [1, 2]}), None).await?;
    assert_eq!(updated.state, "open");
    assert_eq!(updated.change.transition, None);
    assert_eq!(updated.change.kind, ChangeKind::Update);
    assert_eq!(
        t.store.find_by_id(created.id, None).unwrap().payload,
        json!({"lines": [1, 2]})
    );
    Ok(())
}

#[tokio::test]
async fn any_source_transition_fires_from_every_state() -> anyhow::Result<()> {
    let t = TestStore::new();
    let fresh = t.store.create(&cart(), json!({}), None).await?;
    let open = t.store.create(&cart(), json!({}), None).await?;
    t.store.update(open.id, json!({}), Some("create_on_first_add")).await?;

    for id in [fresh.id, open.id] {
        let outcome = t.store.update(id, json!({}), Some("abandon")).await?;
        assert_eq!(outcome.state, "abandoned");
    }
    Ok(())
}

#[tokio::test]
async fn automatic_transition_fires_on_create() -> anyhow::Result<()> {
    let t = TestStore::new();

    let created = t.store.create(&data_source(), json!({"url": "s3://a"}), None).await?;
    assert_eq!(created.state, "created");
    assert_eq!(created.changes.len(), 2);
    assert_eq!(created.changes[1].transition.as_deref(), Some("register"));
    assert_eq!(created.changes[0].timestamp, created.changes[1].timestamp);

    let record = t.store.find_by_id(created.id, None).unwrap();
    assert_eq!(record.state, "created");
    assert_eq!(record.sequence, created.changes[1].sequence);
    Ok(())
}

#[tokio::test]
async fn automatic_transitions_chain_up_to_the_limit() -> anyhow::Result<()> {
    let chained = TestStore::with_auto_limit(5);
    let created = chained.store.create(&data_source(), json!({}), None).await?;
    assert_eq!(created.state, "validated");
    let names: Vec<_> = created
        .changes
        .iter()
        .filter_map(|change| change.transition.as_deref())
        .collect();
    assert_eq!(names, ["register", "validate"]);

    let disabled = TestStore::with_auto_limit(0);
    let created = disabled.store.create(&data_source(), json!({}), None).await?;
    assert_eq!(created.state, "initial_state");
    assert_eq!(created.changes.len(), 1);
    Ok(())
}

#[tokio::test]
async fn delete_writes_tombstone_and_hides_record() -> anyhow::Result<()> {
    let t = TestStore::new();
    let created = t.store.create(&cart(), json!({"lines": []}), None).await?;
    t.tick(5);

    t.store.delete(created.id).await?;

    assert!(t.store.find_by_id(created.id, None).is_none());
    assert_eq!(t.store.count(&cart()), 0);
    let history = t.store.change_history(created.id, None);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].kind, ChangeKind::Delete);
    assert_eq!(history[1].timestamp, t.now());

    assert!(matches!(t.store.delete(created.id).await, Err(Error::NotFound(_))));
    assert!(matches!(
        t.store.update(created.id, json!({}), None).await,
        Err(Error::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn purge_drops_history() -> anyhow::Result<()> {
    let t = TestStore::new();
    let live = t.store.create(&cart(), json!({}), None).await?;
    let deleted = t.store.create(&cart(), json!({}), None).await?;
    t.store.delete(deleted.id).await?;

    t.store.purge(live.id).await?;
    t.store.purge(deleted.id).await?;

    for id in [live.id, deleted.id] {
        assert!(t.store.find_by_id(id, None).is_none());
        assert!(t.store.change_history(id, None).is_empty());
        assert!(matches!(t.store.purge(id).await, Err(Error::NotFound(_))));
    }
    Ok(())
}

#[tokio::test]
async fn unknown_ids_and_models() -> anyhow::Result<()> {
    let t = TestStore::new();
    let missing = TechnicalId::new();

    assert!(t.store.find_by_id(missing, None).is_none());
    assert!(t.store.find_by_id(missing, Some(START)).is_none());
    assert!(t.store.change_history(missing, None).is_empty());
    assert!(matches!(
        t.store.update(missing, json!({}), None).await,
        Err(Error::NotFound(_))
    ));

    let unregistered = flowstore::EntityModel::new("loan", 99);
    assert!(matches!(
        t.store.create(&unregistered, json!({}), None).await,
        Err(Error::UnknownEntityModel(_))
    ));
    assert_eq!(t.store.count(&unregistered), 0);
    assert_eq!(t.store.count(&loan()), 0);
    Ok(())
}
