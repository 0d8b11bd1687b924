//! Integration tests for the document write/read cycle.
//!
//! Covers the create / update / stale-conflict / delete / resurrect
//! scenarios end to end, the precondition matrix of `put_revision`, and
//! the expanded JSON document shape.

use serde_json::json;
use tempfile::tempdir;
use vellum::{AllDocsOptions, Config, RevId, Revision, Status, Vellum};

fn open_db(dir: &tempfile::TempDir) -> Vellum {
    Vellum::open(dir.path().join("test.db"), Config::default()).unwrap()
}

// ============================================================================
// Create / Read
// ============================================================================

#[test]
fn test_create_then_read() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let candidate = Revision::with_body(Some("a".into()), json!({"x": 1}));
    let (stored, status) = db.put_revision(candidate, None).unwrap();

    assert_eq!(status.code(), 201);
    assert!(stored.rev_id.as_ref().unwrap().as_str().starts_with("1-"));

    let doc = db.get_document("a", None).unwrap().unwrap();
    let body = doc.body.unwrap();
    assert_eq!(body["_id"], "a");
    assert!(body["_rev"].as_str().unwrap().starts_with("1-"));
    assert_eq!(body["_attachments"], json!({}));
    assert_eq!(body["x"], 1);

    db.close().unwrap();
}

#[test]
fn test_reserved_keys_are_stripped_on_write() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    // Client-supplied reserved keys must not reach storage
    let candidate = Revision::with_body(
        Some("a".into()),
        json!({"_id": "bogus", "_rev": "9-bogus", "x": 1}),
    );
    let (stored, _) = db.put_revision(candidate, None).unwrap();

    let doc = db.get_document("a", None).unwrap().unwrap();
    let body = doc.body.unwrap();
    assert_eq!(body["_id"], "a");
    assert_eq!(body["_rev"], stored.rev_id.unwrap().as_str());
    assert_eq!(body["x"], 1);

    db.close().unwrap();
}

#[test]
fn test_empty_body_reads_back_as_reserved_keys_only() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    db.put_revision(Revision::with_body(Some("a".into()), json!({})), None)
        .unwrap();

    let doc = db.get_document("a", None).unwrap().unwrap();
    let body = doc.body.unwrap();
    let obj = body.as_object().unwrap();
    assert_eq!(obj.len(), 3); // _id, _rev, _attachments

    db.close().unwrap();
}

#[test]
fn test_get_missing_document_is_none() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    assert!(db.get_document("nope", None).unwrap().is_none());
    assert!(db
        .get_document("nope", Some(&RevId::new("1-x")))
        .unwrap()
        .is_none());

    db.close().unwrap();
}

// ============================================================================
// Update
// ============================================================================

#[test]
fn test_update_advances_generation() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let (rev1, _) = db
        .put_revision(Revision::with_body(Some("a".into()), json!({"x": 1})), None)
        .unwrap();
    let (rev2, status) = db
        .put_revision(
            Revision::with_body(Some("a".into()), json!({"x": 2})),
            rev1.rev_id.as_ref(),
        )
        .unwrap();

    assert_eq!(status.code(), 201);
    assert!(rev2.rev_id.as_ref().unwrap().as_str().starts_with("2-"));
    assert_eq!(db.document_count().unwrap(), 1);

    // The feed shows exactly the new leaf
    let changes = db.changes_since(0, Some(100)).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].rev_id, rev2.rev_id);

    let doc = db.get_document("a", None).unwrap().unwrap();
    assert_eq!(doc.body.unwrap()["x"], 2);

    db.close().unwrap();
}

#[test]
fn test_old_revision_remains_readable_by_id() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let (rev1, _) = db
        .put_revision(Revision::with_body(Some("a".into()), json!({"x": 1})), None)
        .unwrap();
    db.put_revision(
        Revision::with_body(Some("a".into()), json!({"x": 2})),
        rev1.rev_id.as_ref(),
    )
    .unwrap();

    let old = db
        .get_document("a", rev1.rev_id.as_ref())
        .unwrap()
        .unwrap();
    assert_eq!(old.body.unwrap()["x"], 1);

    db.close().unwrap();
}

#[test]
fn test_stale_predecessor_conflicts_and_leaves_store_untouched() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let (rev1, _) = db
        .put_revision(Revision::with_body(Some("a".into()), json!({"x": 1})), None)
        .unwrap();
    let (rev2, _) = db
        .put_revision(
            Revision::with_body(Some("a".into()), json!({"x": 2})),
            rev1.rev_id.as_ref(),
        )
        .unwrap();
    let seq_before = db.last_sequence().unwrap();

    // rev1 is stale now
    let err = db
        .put_revision(
            Revision::with_body(Some("a".into()), json!({"x": 3})),
            rev1.rev_id.as_ref(),
        )
        .unwrap_err();
    assert_eq!(err.status(), 409);

    // Byte-identical pre-call state: same winner, same sequence
    assert_eq!(db.last_sequence().unwrap(), seq_before);
    let doc = db.get_document("a", None).unwrap().unwrap();
    assert_eq!(doc.rev_id, rev2.rev_id);
    assert_eq!(doc.body.unwrap()["x"], 2);

    db.close().unwrap();
}

#[test]
fn test_create_over_live_leaf_conflicts() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    db.put_revision(Revision::with_body(Some("a".into()), json!({"x": 1})), None)
        .unwrap();
    let err = db
        .put_revision(Revision::with_body(Some("a".into()), json!({"x": 9})), None)
        .unwrap_err();
    assert_eq!(err.status(), 409);

    db.close().unwrap();
}

#[test]
fn test_create_blocked_by_live_leaf_behind_conflicting_tombstone() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    // Live local branch: 1-a -> 2-b
    let mut live = Revision::new("a", "2-b", false);
    live.body = Some(json!({"side": "live"}));
    db.force_insert(&mut live, &[RevId::new("2-b"), RevId::new("1-a")], None)
        .unwrap();

    // Foreign tombstone branch outranks it by revid: 1-a -> 9-z
    let mut tombstone = Revision::new("a", "9-z", true);
    db.force_insert(&mut tombstone, &[RevId::new("9-z"), RevId::new("1-a")], None)
        .unwrap();

    // The document still reads as alive through the 2-b leaf
    assert_eq!(db.document_count().unwrap(), 1);
    let winner = db.get_document("a", None).unwrap().unwrap();
    assert_eq!(winner.rev_id.as_ref().unwrap().as_str(), "2-b");

    // A create must conflict, not resurrect over the tombstone
    let err = db
        .put_revision(Revision::with_body(Some("a".into()), json!({"x": 1})), None)
        .unwrap_err();
    assert_eq!(err.status(), 409);

    // The live leaf stays current and untouched
    let winner = db.get_document("a", None).unwrap().unwrap();
    assert_eq!(winner.rev_id.as_ref().unwrap().as_str(), "2-b");
    assert_eq!(winner.body.unwrap()["side"], "live");
    assert_eq!(db.document_count().unwrap(), 1);

    db.close().unwrap();
}

// ============================================================================
// Precondition matrix
// ============================================================================

#[test]
fn test_predecessor_without_docid_is_bad_request() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let prev = RevId::new("1-abc");
    let err = db
        .put_revision(Revision::with_body(None, json!({})), Some(&prev))
        .unwrap_err();
    assert_eq!(err.status(), 400);

    db.close().unwrap();
}

#[test]
fn test_deletion_without_predecessor_is_bad_request() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let err = db
        .put_revision(Revision::deletion("a"), None)
        .unwrap_err();
    assert_eq!(err.status(), 400);

    db.close().unwrap();
}

#[test]
fn test_predecessor_on_unknown_document_is_not_found() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let prev = RevId::new("1-abc");
    let err = db
        .put_revision(
            Revision::with_body(Some("ghost".into()), json!({})),
            Some(&prev),
        )
        .unwrap_err();
    assert_eq!(err.status(), 404);

    db.close().unwrap();
}

#[test]
fn test_ungrammatical_predecessor_is_bad_request() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    // Graft a leaf whose id has no parsable generation, then try to
    // update past it
    let mut foreign = Revision::new("a", "bogus", false);
    foreign.body = Some(json!({"x": 1}));
    db.force_insert(&mut foreign, &[RevId::new("bogus")], None)
        .unwrap();

    let err = db
        .put_revision(
            Revision::with_body(Some("a".into()), json!({"x": 2})),
            Some(&RevId::new("bogus")),
        )
        .unwrap_err();
    assert_eq!(err.status(), 400);

    db.close().unwrap();
}

// ============================================================================
// Delete / Resurrect
// ============================================================================

#[test]
fn test_delete_then_resurrect() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let (rev1, _) = db
        .put_revision(Revision::with_body(Some("a".into()), json!({"x": 1})), None)
        .unwrap();
    let (rev2, _) = db
        .put_revision(
            Revision::with_body(Some("a".into()), json!({"x": 2})),
            rev1.rev_id.as_ref(),
        )
        .unwrap();

    // Delete: 200, document reads as absent, history preserved
    let (tombstone, status) = db
        .put_revision(Revision::deletion("a"), rev2.rev_id.as_ref())
        .unwrap();
    assert_eq!(status, Status::Ok);
    assert!(tombstone.deleted);
    assert!(tombstone.rev_id.as_ref().unwrap().as_str().starts_with("3-"));
    assert_eq!(db.document_count().unwrap(), 0);
    assert!(db.get_document("a", None).unwrap().is_none());

    // Resurrection over the tombstone is permitted and starts a new root
    let (reborn, status) = db
        .put_revision(Revision::with_body(Some("a".into()), json!({"x": 4})), None)
        .unwrap();
    assert_eq!(status.code(), 201);
    assert!(reborn.rev_id.as_ref().unwrap().as_str().starts_with("1-"));
    assert_eq!(db.document_count().unwrap(), 1);
    assert_eq!(
        db.get_document("a", None).unwrap().unwrap().body.unwrap()["x"],
        4
    );

    db.close().unwrap();
}

#[test]
fn test_tombstone_readable_by_explicit_rev() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let (rev1, _) = db
        .put_revision(Revision::with_body(Some("a".into()), json!({"x": 1})), None)
        .unwrap();
    let (tombstone, _) = db
        .put_revision(Revision::deletion("a"), rev1.rev_id.as_ref())
        .unwrap();

    let read = db
        .get_document("a", tombstone.rev_id.as_ref())
        .unwrap()
        .unwrap();
    assert!(read.deleted);
    assert_eq!(read.body.unwrap()["_deleted"], true);

    db.close().unwrap();
}

// ============================================================================
// load_body / get_all_revisions
// ============================================================================

#[test]
fn test_load_body_fills_sequence_and_body() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let (stored, _) = db
        .put_revision(Revision::with_body(Some("a".into()), json!({"x": 1})), None)
        .unwrap();

    let mut bare = Revision::new("a", stored.rev_id.clone().unwrap(), false);
    db.load_body(&mut bare, false).unwrap();

    assert_eq!(bare.sequence, stored.sequence);
    assert_eq!(bare.body.unwrap()["x"], 1);

    db.close().unwrap();
}

#[test]
fn test_load_body_unknown_revision_is_not_found() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    db.put_revision(Revision::with_body(Some("a".into()), json!({})), None)
        .unwrap();

    let mut missing = Revision::new("a", "9-doesnotexist", false);
    let err = db.load_body(&mut missing, false).unwrap_err();
    assert_eq!(err.status(), 404);

    db.close().unwrap();
}

#[test]
fn test_get_all_revisions_newest_first() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let (rev1, _) = db
        .put_revision(Revision::with_body(Some("a".into()), json!({"x": 1})), None)
        .unwrap();
    let (rev2, _) = db
        .put_revision(
            Revision::with_body(Some("a".into()), json!({"x": 2})),
            rev1.rev_id.as_ref(),
        )
        .unwrap();

    let revisions = db.get_all_revisions("a").unwrap();
    assert_eq!(revisions.len(), 2);
    assert_eq!(revisions[0].rev_id, rev2.rev_id);
    assert_eq!(revisions[1].rev_id, rev1.rev_id);
    assert!(revisions[0].sequence > revisions[1].sequence);

    assert!(db.get_all_revisions("ghost").unwrap().is_empty());

    db.close().unwrap();
}

// ============================================================================
// get_all_docs
// ============================================================================

#[test]
fn test_get_all_docs_pages_in_docid_order() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    for docid in ["cherry", "apple", "banana"] {
        db.put_revision(
            Revision::with_body(Some(docid.into()), json!({"name": docid})),
            None,
        )
        .unwrap();
    }

    let page = db.get_all_docs(&AllDocsOptions::new()).unwrap();
    let ids: Vec<&str> = page.rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["apple", "banana", "cherry"]);
    assert_eq!(page.total_rows, 3);
    assert_eq!(page.offset, 0);
    assert!(page.update_seq.is_none());

    let page = db
        .get_all_docs(&AllDocsOptions {
            descending: true,
            limit: Some(2),
            ..Default::default()
        })
        .unwrap();
    let ids: Vec<&str> = page.rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["cherry", "banana"]);

    let page = db
        .get_all_docs(&AllDocsOptions {
            skip: 1,
            update_seq: true,
            ..Default::default()
        })
        .unwrap();
    let ids: Vec<&str> = page.rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["banana", "cherry"]);
    assert_eq!(page.offset, 1);
    assert_eq!(page.update_seq, Some(3));

    db.close().unwrap();
}

#[test]
fn test_get_all_docs_pages_across_conflicting_leaves() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    // "apple" carries two conflicting live leaves forked from 1-a
    let mut local = Revision::new("apple", "2-b", false);
    local.body = Some(json!({"side": "local"}));
    db.force_insert(&mut local, &[RevId::new("2-b"), RevId::new("1-a")], None)
        .unwrap();
    let mut foreign = Revision::new("apple", "2-z", false);
    foreign.body = Some(json!({"side": "remote"}));
    db.force_insert(&mut foreign, &[RevId::new("2-z"), RevId::new("1-a")], None)
        .unwrap();

    db.put_revision(Revision::with_body(Some("banana".into()), json!({})), None)
        .unwrap();
    db.put_revision(Revision::with_body(Some("cherry".into()), json!({})), None)
        .unwrap();

    // limit counts documents, not leaves: the conflict collapses to its
    // winner and the page still holds two distinct documents
    let page = db
        .get_all_docs(&AllDocsOptions {
            limit: Some(2),
            include_docs: true,
            ..Default::default()
        })
        .unwrap();
    let ids: Vec<&str> = page.rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["apple", "banana"]);
    assert_eq!(page.rows[0].value.rev, "2-z");
    assert_eq!(page.rows[0].doc.as_ref().unwrap()["side"], "remote");
    assert_eq!(page.total_rows, 2);

    // skip counts documents too: the window lands past the conflict
    let page = db
        .get_all_docs(&AllDocsOptions {
            skip: 2,
            ..Default::default()
        })
        .unwrap();
    let ids: Vec<&str> = page.rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["cherry"]);
    assert_eq!(page.offset, 2);

    db.close().unwrap();
}

#[test]
fn test_get_all_docs_include_docs_and_deleted_excluded() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);

    let (kept, _) = db
        .put_revision(Revision::with_body(Some("kept".into()), json!({"x": 1})), None)
        .unwrap();
    let (gone, _) = db
        .put_revision(Revision::with_body(Some("gone".into()), json!({"x": 2})), None)
        .unwrap();
    db.put_revision(Revision::deletion("gone"), gone.rev_id.as_ref())
        .unwrap();

    let page = db
        .get_all_docs(&AllDocsOptions {
            include_docs: true,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(page.rows.len(), 1);
    let row = &page.rows[0];
    assert_eq!(row.id, "kept");
    assert_eq!(row.key, "kept");
    assert_eq!(row.value.rev, kept.rev_id.unwrap().as_str());
    let doc = row.doc.as_ref().unwrap();
    assert_eq!(doc["_id"], "kept");
    assert_eq!(doc["x"], 1);

    db.close().unwrap();
}
