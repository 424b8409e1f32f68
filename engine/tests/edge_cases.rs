//! Edge case tests for recipebox-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use recipebox_engine::{
    Error, Location, OpKind, PhotoState, RecipeBook, RecipeDraft, RecipeQuery, SortOrder,
    SyncState, MAX_TITLE_LEN,
};
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::TempDir;

fn book() -> RecipeBook {
    RecipeBook::in_memory("phone-1").unwrap()
}

// ============================================================================
// Title Edge Cases
// ============================================================================

#[test]
fn unicode_titles() {
    let book = book();

    let titles = vec![
        "親子丼",
        "Борщ",
        "شاورما",
        "🍝 Pasta 🍅",
        "Crème brûlée",
    ];

    for title in &titles {
        let record = book.create_recipe(RecipeDraft::new(*title)).unwrap();
        assert_eq!(record.title, *title);
        assert_eq!(book.get(&record.id).unwrap().title, *title);
    }
    assert_eq!(book.list_all().len(), titles.len());
}

#[test]
fn title_length_counts_characters_not_bytes() {
    let book = book();

    // Multi-byte characters right at the limit
    let at_limit: String = "é".repeat(MAX_TITLE_LEN);
    assert!(book.create_recipe(RecipeDraft::new(at_limit)).is_ok());

    let over_limit: String = "é".repeat(MAX_TITLE_LEN + 1);
    let err = book.create_recipe(RecipeDraft::new(over_limit)).unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "title"));
}

#[test]
fn whitespace_only_title_is_rejected() {
    let book = book();

    for title in ["", " ", "\t\n"] {
        let err = book.create_recipe(RecipeDraft::new(title)).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }), "title {:?}", title);
    }
    assert!(book.list_all().is_empty());
    assert!(book.pending_changes(None).is_empty());
}

#[test]
fn blank_ingredient_names_its_index() {
    let book = book();
    let draft = RecipeDraft::new("Salad").with_ingredients(["lettuce", "  ", "oil"]);

    let err = book.create_recipe(draft).unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "ingredients[1]"));
}

#[test]
fn rejected_update_leaves_record_untouched() {
    let book = book();
    let record = book.create_recipe(RecipeDraft::new("Soup")).unwrap();

    let err = book
        .update_recipe(&record.id, RecipeDraft::new("x".repeat(MAX_TITLE_LEN + 1)))
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    let stored = book.get(&record.id).unwrap();
    assert_eq!(stored.title, "Soup");
    assert_eq!(stored.updated_at, record.updated_at);
    assert_eq!(book.pending_changes(Some(&record.id)).len(), 1);
}

// ============================================================================
// Location Edge Cases
// ============================================================================

#[test]
fn location_bounds_are_inclusive() {
    let book = book();
    let record = book.create_recipe(RecipeDraft::new("Polar stew")).unwrap();

    for (lat, lon) in [(90.0, 180.0), (-90.0, -180.0), (0.0, 0.0)] {
        assert!(book
            .tag_location(&record.id, Some(Location::new(lat, lon)))
            .is_ok());
    }
}

#[test]
fn invalid_locations_are_rejected() {
    let book = book();
    let record = book.create_recipe(RecipeDraft::new("Lost stew")).unwrap();

    for (lat, lon) in [
        (90.1, 0.0),
        (0.0, -180.5),
        (f64::NAN, 0.0),
        (0.0, f64::INFINITY),
    ] {
        let err = book
            .tag_location(&record.id, Some(Location::new(lat, lon)))
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }), "({}, {})", lat, lon);
    }
    assert!(book.get(&record.id).unwrap().location.is_none());
}

#[test]
fn clearing_location_is_an_update() {
    let book = book();
    let record = book.create_recipe(RecipeDraft::new("Tapas")).unwrap();
    book.tag_location(&record.id, Some(Location::new(40.4, -3.7)))
        .unwrap();

    let cleared = book.tag_location(&record.id, None).unwrap();
    assert!(cleared.location.is_none());

    let ops: Vec<OpKind> = book
        .pending_changes(Some(&record.id))
        .iter()
        .map(|e| e.op)
        .collect();
    assert_eq!(ops, vec![OpKind::Create, OpKind::Update, OpKind::Update]);
}

// ============================================================================
// Query Edge Cases
// ============================================================================

#[test]
fn distance_sort_puts_untagged_last() {
    let book = book();
    let berlin = Location::new(52.52, 13.405);

    let far = book.create_recipe(RecipeDraft::new("Paella")).unwrap();
    book.tag_location(&far.id, Some(Location::new(39.47, -0.38)))
        .unwrap();
    let near = book.create_recipe(RecipeDraft::new("Currywurst")).unwrap();
    book.tag_location(&near.id, Some(Location::new(52.50, 13.40)))
        .unwrap();
    let untagged = book.create_recipe(RecipeDraft::new("Toast")).unwrap();

    let mut query = RecipeQuery::new().sort(SortOrder::Distance);
    query.near = Some(recipebox_engine::NearFilter {
        center: berlin,
        radius_km: f64::INFINITY,
    });
    // The near filter drops untagged rows, so sort without it as well.
    let filtered: Vec<String> = book.query(&query).into_iter().map(|s| s.id).collect();
    assert_eq!(filtered, vec![near.id.clone(), far.id.clone()]);

    query.near = None;
    let all: Vec<String> = book.query(&query).into_iter().map(|s| s.id).collect();
    assert_eq!(all.len(), 3);
    assert_eq!(all.last(), Some(&untagged.id));
}

#[test]
fn near_filter_radius() {
    let book = book();
    let paris = Location::new(48.8566, 2.3522);

    let croissant = book.create_recipe(RecipeDraft::new("Croissant")).unwrap();
    book.tag_location(&croissant.id, Some(Location::new(48.86, 2.35)))
        .unwrap();
    let pizza = book.create_recipe(RecipeDraft::new("Pizza")).unwrap();
    book.tag_location(&pizza.id, Some(Location::new(40.85, 14.27)))
        .unwrap();

    let rows = book.query(&RecipeQuery::new().near(paris, 50.0));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, croissant.id);

    let rows = book.query(&RecipeQuery::new().near(paris, 2000.0));
    assert_eq!(rows.len(), 2);
}

#[test]
fn blank_search_matches_everything() {
    let book = book();
    book.create_recipe(RecipeDraft::new("Pasta")).unwrap();
    book.create_recipe(RecipeDraft::new("Pesto")).unwrap();

    assert_eq!(book.query(&RecipeQuery::new().title_contains("   ")).len(), 2);
    assert_eq!(book.query(&RecipeQuery::new().title_contains("PES")).len(), 1);
    assert!(book.query(&RecipeQuery::new().title_contains("risotto")).is_empty());
}

#[test]
fn limit_zero_returns_nothing() {
    let book = book();
    book.create_recipe(RecipeDraft::new("Pasta")).unwrap();

    assert!(book.query(&RecipeQuery::new().limit(0)).is_empty());
}

#[test]
fn filters_combine() {
    let book = book();
    let a = book.create_recipe(RecipeDraft::new("Apple pie")).unwrap();
    book.attach_photo(&a.id, b"jpeg", "image/jpeg", 1).unwrap();
    book.create_recipe(RecipeDraft::new("Apple crumble")).unwrap();

    let rows = book.query(
        &RecipeQuery::new()
            .title_contains("apple")
            .has_photo(true)
            .sync_state(SyncState::Pending),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, a.id);
    assert_eq!(rows[0].photo_state, PhotoState::Pending);
}

// ============================================================================
// Volume Edge Cases
// ============================================================================

#[test]
fn many_recipes() {
    let book = book();

    for i in 0..1000 {
        book.create_recipe(RecipeDraft::new(format!("Recipe {:04}", i)))
            .unwrap();
    }

    assert_eq!(book.list_all().len(), 1000);
    assert_eq!(book.pending_changes(None).len(), 1000);

    let rows = book.query(&RecipeQuery::new().sort(SortOrder::Title).limit(3));
    let titles: Vec<&str> = rows.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Recipe 0000", "Recipe 0001", "Recipe 0002"]);
    assert!(!book.verify_cache().unwrap());
}

#[test]
fn many_edits_keep_sequence_order() {
    let book = book();
    let record = book.create_recipe(RecipeDraft::new("v0")).unwrap();

    for i in 1..=200 {
        book.update_recipe(&record.id, RecipeDraft::new(format!("v{}", i)))
            .unwrap();
    }

    let pending = book.pending_changes(Some(&record.id));
    assert_eq!(pending.len(), 201);
    assert!(pending.windows(2).all(|w| w[0].seq < w[1].seq));
    assert_eq!(
        pending.last().and_then(|e| e.payload.as_ref()).map(|c| c.title.as_str()),
        Some("v200")
    );
}

// ============================================================================
// Photo Edge Cases
// ============================================================================

#[test]
fn detach_without_photo_is_invalid() {
    let book = book();
    let record = book.create_recipe(RecipeDraft::new("Plain rice")).unwrap();

    let err = book.detach_photo(&record.id).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(book.pending_changes(Some(&record.id)).len(), 1);
}

#[test]
fn empty_photo_is_rejected() {
    let book = book();
    let record = book.create_recipe(RecipeDraft::new("Ghost dish")).unwrap();

    let err = book
        .attach_photo(&record.id, &[], "image/jpeg", 1)
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test]
fn same_photo_on_two_recipes_is_stored_once() {
    let book = book();
    let a = book.create_recipe(RecipeDraft::new("A")).unwrap();
    let b = book.create_recipe(RecipeDraft::new("B")).unwrap();

    let a = book.attach_photo(&a.id, b"same bytes", "image/png", 1).unwrap();
    let b = book.attach_photo(&b.id, b"same bytes", "image/png", 2).unwrap();
    assert_eq!(a.photo_ref, b.photo_ref);
    assert_eq!(book.summary().blob_count, 1);

    book.detach_photo(&a.id).unwrap();
    let blob_ref = b.photo_ref.clone().unwrap();
    assert_eq!(book.blob_bytes(&blob_ref).unwrap(), b"same bytes");
}

// ============================================================================
// Missing Records
// ============================================================================

#[test]
fn operations_on_unknown_ids() {
    let book = book();

    assert!(matches!(book.get("nope"), Err(Error::NotFound(_))));
    assert!(matches!(
        book.update_recipe("nope", RecipeDraft::new("x")),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(book.delete_recipe("nope"), Err(Error::NotFound(_))));
    assert!(!book.toggle_selection("nope"));
    assert!(book.pending_changes(None).is_empty());
}

#[test]
fn deleted_recipe_cannot_be_edited() {
    let book = book();
    let record = book.create_recipe(RecipeDraft::new("Gone")).unwrap();
    book.delete_recipe(&record.id).unwrap();

    assert!(matches!(book.get(&record.id), Err(Error::NotFound(_))));
    assert!(book
        .update_recipe(&record.id, RecipeDraft::new("Back"))
        .is_err());
    assert!(book.delete_recipe(&record.id).is_err());
}

// ============================================================================
// File Backend Edge Cases
// ============================================================================

#[test]
fn torn_change_log_line_is_dropped_on_reopen() {
    let dir = TempDir::new().unwrap();
    let id = {
        let book = RecipeBook::open_dir(dir.path(), "phone-1").unwrap();
        book.create_recipe(RecipeDraft::new("Bread")).unwrap().id.clone()
    };

    // Simulate a crash in the middle of an append.
    let mut file = OpenOptions::new()
        .append(true)
        .open(dir.path().join("changes.jsonl"))
        .unwrap();
    file.write_all(br#"{"seq":2,"recipeId":"#).unwrap();
    drop(file);

    let book = RecipeBook::open_dir(dir.path(), "phone-1").unwrap();
    let pending = book.pending_changes(None);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].recipe_id, id);

    // Appends continue on a clean line.
    book.update_recipe(&id, RecipeDraft::new("Sourdough")).unwrap();
    drop(book);
    let book = RecipeBook::open_dir(dir.path(), "phone-1").unwrap();
    assert_eq!(book.pending_changes(None).len(), 2);
    assert_eq!(book.get(&id).unwrap().title, "Sourdough");
}

#[test]
fn sequences_never_reused_after_reopen() {
    let dir = TempDir::new().unwrap();
    let first_seq = {
        let book = RecipeBook::open_dir(dir.path(), "phone-1").unwrap();
        let record = book.create_recipe(RecipeDraft::new("Bagel")).unwrap();
        book.delete_recipe(&record.id).unwrap();
        book.pending_changes(None).last().unwrap().seq
    };

    let book = RecipeBook::open_dir(dir.path(), "phone-1").unwrap();
    let record = book.create_recipe(RecipeDraft::new("Pretzel")).unwrap();
    let seq = book.pending_changes(Some(&record.id))[0].seq;
    assert!(seq > first_seq);
}

#[test]
fn photo_bytes_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let (id, blob_ref) = {
        let book = RecipeBook::open_dir(dir.path(), "phone-1").unwrap();
        let record = book.create_recipe(RecipeDraft::new("Cake")).unwrap();
        let record = book
            .attach_photo(&record.id, b"\x89PNG....", "image/png", 7)
            .unwrap();
        (record.id.clone(), record.photo_ref.clone().unwrap())
    };

    let book = RecipeBook::open_dir(dir.path(), "phone-1").unwrap();
    assert_eq!(book.get(&id).unwrap().photo_state(), PhotoState::Pending);
    assert_eq!(book.blob_bytes(&blob_ref).unwrap(), b"\x89PNG....");
    let blob = book.blob(&blob_ref).unwrap();
    assert_eq!(blob.content_type, "image/png");
    assert_eq!(blob.captured_at, 7);
}
