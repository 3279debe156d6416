//! File journal persistence and replay.

use std::io::Write;
use std::sync::Arc;

use flowstore::{ChangeKind, Condition, Error, FileJournal, Journal};
use serde_json::json;
use test_utils::store_test;

use crate::support::helpers::{START, open_store};
use crate::support::models::{cart, data_source, loan};

store_test!(replay_restores_records_keys_and_history, |dir| {
    let journal = Arc::new(FileJournal::open(dir).await?);
    let t = open_store(journal.clone()).await?;

    let cart_id = t.store.create(&cart(), json!({"lines": []}), None).await?.id;
    t.tick(1);
    t.store
        .update(cart_id, json!({"lines": ["a"]}), Some("create_on_first_add"))
        .await?;
    let loan_id = t.store.create(&loan(), json!({"loanId": "L-1"}), None).await?.id;
    let gone = t.store.create(&loan(), json!({"loanId": "L-2"}), None).await?.id;
    t.tick(1);
    t.store.delete(gone).await?;
    let source = t.store.create(&data_source(), json!({}), None).await?;
    let last_sequence = source.changes.last().map(|c| c.sequence).unwrap_or_default();

    assert!(dir.join("cart.jsonl").exists());
    assert!(dir.join("loan.jsonl").exists());

    // A second store over the same directory sees the same world.
    let reopened = t.reopen(Arc::new(FileJournal::open(dir).await?)).await?;

    let cart_record = reopened.find_by_id(cart_id, None).expect("cart replayed");
    assert_eq!(cart_record, t.store.find_by_id(cart_id, None).unwrap());
    assert_eq!(cart_record.created_at, START);
    assert_eq!(
        reopened.change_history(cart_id, None),
        t.store.change_history(cart_id, None)
    );
    assert_eq!(reopened.find_by_id(cart_id, Some(START)).unwrap().state, "initial_state");

    assert!(reopened.find_by_id(gone, None).is_none());
    let tombstone = reopened.change_history(gone, None);
    assert_eq!(tombstone.last().map(|c| c.kind), Some(ChangeKind::Delete));

    assert_eq!(reopened.find_by_id(source.id, None).unwrap().state, "created");
    assert_eq!(
        reopened
            .find_by_business_key(&loan(), "loanId", &json!("L-1"), None)
            .map(|r| r.id),
        Some(loan_id)
    );
    assert!(matches!(
        reopened.create(&loan(), json!({"loanId": "L-1"}), None).await,
        Err(Error::DuplicateKey { .. })
    ));
    // L-2 was released by the delete.
    reopened.create(&loan(), json!({"loanId": "L-2"}), None).await?;

    let next = reopened.create(&cart(), json!({}), None).await?;
    assert!(next.changes[0].sequence > last_sequence);
    assert_eq!(reopened.search(&cart(), &Condition::all())?.len(), 2);
    Ok(())
});

store_test!(torn_trailing_line_is_skipped, |dir| {
    let journal = Arc::new(FileJournal::open(dir).await?);
    let t = open_store(journal.clone()).await?;
    let kept = t.store.create(&cart(), json!({"v": 1}), None).await?.id;

    // Simulate a crash halfway through writing the next record.
    let path = journal.path_for(&cart());
    let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
    file.write_all(br#"{"model":{"entity_type":"cart","version":1},"entry":{"id":"#)?;
    drop(file);

    let reopened = t.reopen(Arc::new(FileJournal::open(dir).await?)).await?;
    assert_eq!(reopened.find_by_id(kept, None).unwrap().payload, json!({"v": 1}));
    assert_eq!(reopened.count(&cart()), 1);

    // The torn bytes are gone, so later appends start on a clean line.
    let contents = std::fs::read_to_string(&path)?;
    assert!(contents.ends_with('\n'));
    assert_eq!(contents.lines().count(), 1);

    let added = reopened.create(&cart(), json!({"v": 2}), None).await?.id;
    let again = t.reopen(Arc::new(FileJournal::open(dir).await?)).await?;
    assert_eq!(again.count(&cart()), 2);
    assert!(again.find_by_id(added, None).is_some());
    Ok(())
});

store_test!(incomplete_append_is_cut_before_next_write, |dir| {
    let journal = Arc::new(FileJournal::open(dir).await?);
    assert_eq!(journal.dir(), dir);
    let t = open_store(journal.clone()).await?;
    let first = t.store.create(&cart(), json!({"v": 1}), None).await?.id;

    // Half of a record left behind by a write that failed midway.
    let path = journal.path_for(&cart());
    let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
    file.write_all(br#"{"model":{"entity_type":"cart","version":1},"entry":{"id":"#)?;
    drop(file);

    let second = t.store.create(&cart(), json!({"v": 2}), None).await?.id;

    let reopened = t.reopen(Arc::new(FileJournal::open(dir).await?)).await?;
    assert_eq!(reopened.count(&cart()), 2);
    assert_eq!(reopened.find_by_id(first, None).unwrap().payload, json!({"v": 1}));
    assert_eq!(reopened.find_by_id(second, None).unwrap().payload, json!({"v": 2}));
    assert_eq!(std::fs::read_to_string(&path)?.lines().count(), 2);
    Ok(())
});

store_test!(corrupt_middle_line_fails_open, |dir| {
    let journal = Arc::new(FileJournal::open(dir).await?);
    let t = open_store(journal.clone()).await?;
    t.store.create(&cart(), json!({}), None).await?;
    t.store.create(&cart(), json!({}), None).await?;

    let path = journal.path_for(&cart());
    let contents = std::fs::read_to_string(&path)?;
    let mut lines: Vec<&str> = contents.lines().collect();
    lines.insert(1, "garbage");
    std::fs::write(&path, format!("{}\n", lines.join("\n")))?;

    let err = t
        .reopen(Arc::new(FileJournal::open(dir).await?))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CorruptJournal { line: 2, .. }), "{err}");
    Ok(())
});

store_test!(purge_removes_entity_from_journal, |dir| {
    let journal = Arc::new(FileJournal::open(dir).await?);
    let t = open_store(journal.clone()).await?;
    let purged = t.store.create(&loan(), json!({"loanId": "L-1"}), None).await?.id;
    let kept = t.store.create(&loan(), json!({"loanId": "L-2"}), None).await?.id;
    t.store.update(purged, json!({"loanId": "L-1"}), Some("approve")).await?;

    t.store.purge(purged).await?;

    let records = journal.load().await?;
    assert!(records.iter().all(|r| r.entry.id == kept));
    assert_eq!(records.len(), 1);

    // The key is free again and appends keep working after the rewrite.
    t.store.create(&loan(), json!({"loanId": "L-1"}), None).await?;
    let reopened = t.reopen(Arc::new(FileJournal::open(dir).await?)).await?;
    assert_eq!(reopened.count(&loan()), 2);
    assert!(reopened.change_history(purged, None).is_empty());
    Ok(())
});

store_test!(load_merges_files_by_global_sequence, |dir| {
    let journal = Arc::new(FileJournal::open(dir).await?);
    let t = open_store(journal.clone()).await?;
    t.store.create(&cart(), json!({}), None).await?;
    t.store.create(&loan(), json!({"loanId": "x"}), None).await?;
    t.store.create(&cart(), json!({}), None).await?;

    let sequences: Vec<u64> = journal
        .load()
        .await?
        .iter()
        .map(|r| r.entry.sequence)
        .collect();
    assert_eq!(sequences, [1, 2, 3]);
    Ok(())
});
