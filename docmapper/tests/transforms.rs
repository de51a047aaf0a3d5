mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use docmapper::{
    bson::{self, Bson, doc},
    prelude::*,
};

use common::connect;

fn timestamp() -> FieldType {
    FieldType::define(|t| {
        t.of(Kind::Date).transform_before(Stage::New, |_| {
            Ok(Bson::DateTime(bson::DateTime::from_chrono(chrono::Utc::now())))
        })
    })
}

fn revision() -> FieldType {
    FieldType::define(|t| {
        t.of(Kind::Number)
            .transform_before(Stage::New, |_| Ok(Bson::Int32(1)))
            .transform_before(Stage::Update, |current| {
                Ok(Bson::Int32(current.as_i32().unwrap_or(0) + 1))
            })
    })
}

#[tokio::test]
async fn generated_fields_are_stamped_on_insert_and_update() {
    let registry = Registry::new();
    let article = registry
        .define("Article", |s| {
            s.field("title").of(Kind::String);
            s.field("created_at").generated_by(timestamp());
            s.field("revision").generated_by(revision());
            s.in_collection("articles");
            Ok(())
        })
        .unwrap();
    let (mapper, store) = connect(registry).await;

    let mut draft = mapper.model(&article).create(doc! { "title": "Draft" }).unwrap();
    assert!(draft.get("created_at").is_none());
    draft.save().await.unwrap();

    let created = draft.get("created_at").cloned().unwrap();
    assert!(matches!(created, Bson::DateTime(_)));
    assert_eq!(draft.get("revision"), Some(&Bson::Int32(1)));
    let stored = &store.inner.documents("articles").await[0];
    assert_eq!(stored.get("created_at"), Some(&created));
    assert_eq!(stored.get_i32("revision").unwrap(), 1);

    // Nothing changed, so nothing is sent and nothing is stamped.
    draft.save().await.unwrap();
    assert_eq!(store.updates(), 0);
    assert_eq!(draft.get("revision"), Some(&Bson::Int32(1)));

    draft.set("title", "Final").unwrap();
    draft.save().await.unwrap();
    assert_eq!(
        store.last_update().unwrap().sets(),
        &doc! { "title": "Final", "revision": 2 }
    );

    let stored = &store.inner.documents("articles").await[0];
    assert_eq!(stored.get("created_at"), Some(&created));
    assert_eq!(stored.get_i32("revision").unwrap(), 2);
}

#[tokio::test]
async fn extended_types_inherit_transforms() {
    let touched = timestamp().extend(|t| {
        t.transform_before(Stage::Update, |_| {
            Ok(Bson::DateTime(bson::DateTime::from_millis(0)))
        })
    });

    let registry = Registry::new();
    let note = registry
        .define("Note", |s| {
            s.field("text").of(Kind::String);
            s.field("touched_at").generated_by(touched.clone());
            s.in_collection("notes");
            Ok(())
        })
        .unwrap();
    let (mapper, store) = connect(registry).await;

    let mut memo = mapper.model(&note).create(doc! { "text": "a" }).unwrap();
    memo.save().await.unwrap();
    let inserted = memo.get("touched_at").cloned().unwrap();
    assert_ne!(inserted, Bson::DateTime(bson::DateTime::from_millis(0)));

    memo.set("text", "b").unwrap();
    memo.save().await.unwrap();
    let stored = &store.inner.documents("notes").await[0];
    assert_eq!(
        stored.get("touched_at"),
        Some(&Bson::DateTime(bson::DateTime::from_millis(0)))
    );
}

#[tokio::test]
async fn object_transforms_see_field_transform_output() {
    let registry = Registry::new();
    let page = registry
        .define("Page", |s| {
            s.field("title").of(Kind::String);
            s.field("slug").of(Kind::String);
            s.field("revision").generated_by(revision());
            s.transform_before(Stage::New, |document| {
                let slug = document
                    .get("title")
                    .and_then(Bson::as_str)
                    .map(|title| title.to_lowercase().replace(' ', "-"))
                    .unwrap_or_default();
                let revision = document.get("revision").and_then(Bson::as_i32).unwrap_or(0);
                document.set("slug", format!("{}-r{}", slug, revision))
            });
            s.in_collection("pages");
            Ok(())
        })
        .unwrap();
    let (mapper, store) = connect(registry).await;

    let mut home = mapper.model(&page).create(doc! { "title": "Home Page" }).unwrap();
    home.save().await.unwrap();

    let stored = &store.inner.documents("pages").await[0];
    assert_eq!(stored.get_str("slug").unwrap(), "home-page-r1");
}

struct Reserve {
    delay: Duration,
}

#[async_trait]
impl ObjectTransform for Reserve {
    async fn apply(&self, document: &mut Instance) -> MapperResult<()> {
        tokio::time::sleep(self.delay).await;
        document.set("reserved", true)
    }
}

#[tokio::test]
async fn object_transforms_may_await() {
    let registry = Registry::new();
    let seat = registry
        .define("Seat", |s| {
            s.field("row").of(Kind::Number);
            s.field("reserved").of(Kind::Boolean);
            s.transform_async_before(Stage::Update, Reserve {
                delay: Duration::from_millis(5),
            });
            s.in_collection("seats");
            Ok(())
        })
        .unwrap();
    let (mapper, store) = connect(registry).await;

    let mut seat = mapper.model(&seat).create(doc! { "row": 3 }).unwrap();
    seat.save().await.unwrap();
    assert!(seat.get("reserved").is_none());

    seat.set("row", 4).unwrap();
    seat.save().await.unwrap();
    assert_eq!(
        store.last_update().unwrap().sets(),
        &doc! { "row": 4, "reserved": true }
    );
}

#[tokio::test]
async fn failing_transform_aborts_the_write() {
    let registry = Registry::new();
    let ticket = registry
        .define("Ticket", |s| {
            s.field("code").of(Kind::String);
            s.transform_before(Stage::New, |_| {
                Err(MapperError::Precondition("no tickets left".to_string()))
            });
            s.in_collection("tickets");
            Ok(())
        })
        .unwrap();
    let (mapper, store) = connect(registry).await;

    let mut ticket = mapper.model(&ticket).create(doc! { "code": "A1" }).unwrap();
    assert!(matches!(ticket.save().await, Err(MapperError::Precondition(_))));
    assert!(ticket.is_new());
    assert_eq!(store.inserts(), 0);
}

#[tokio::test]
async fn failing_field_transform_aborts_the_update() {
    let guarded = FieldType::define(|t| {
        t.of(Kind::Number).transform_before(Stage::Update, |_| {
            Err(MapperError::Transform("ledger totals are frozen".to_string()))
        })
    });

    let registry = Registry::new();
    let ledger = registry
        .define("Ledger", |s| {
            s.field("total").of(guarded.clone());
            s.field("label").of(Kind::String);
            s.in_collection("ledgers");
            Ok(())
        })
        .unwrap();
    let (mapper, store) = connect(registry).await;

    let mut books = mapper.model(&ledger).create(doc! { "total": 1, "label": "a" }).unwrap();
    books.save().await.unwrap();

    books.set("label", "b").unwrap();
    assert!(matches!(books.save().await, Err(MapperError::Transform(_))));
    assert_eq!(store.updates(), 0);
    assert_eq!(store.inner.documents("ledgers").await[0].get_str("label").unwrap(), "a");
}

#[tokio::test]
async fn remove_transforms_run_before_delete() {
    let removed = Arc::new(AtomicUsize::new(0));
    let counter = removed.clone();
    let tombstone = FieldType::define(|t| {
        t.of(Kind::Date).transform_before(Stage::Remove, |_| {
            Ok(Bson::DateTime(bson::DateTime::from_millis(1)))
        })
    });

    let registry = Registry::new();
    let upload = registry
        .define("Upload", |s| {
            s.field("path").of(Kind::String);
            s.field("deleted_at").generated_by(tombstone.clone());
            s.transform_before(Stage::Remove, move |document| {
                counter.fetch_add(1, Ordering::SeqCst);
                document.set("path", "/dev/null")
            });
            s.in_collection("uploads");
            Ok(())
        })
        .unwrap();
    let (mapper, store) = connect(registry).await;

    let mut file = mapper.model(&upload).create(doc! { "path": "/tmp/a" }).unwrap();
    file.save().await.unwrap();
    assert_eq!(removed.load(Ordering::SeqCst), 0);

    file.destroy().await.unwrap();
    assert_eq!(removed.load(Ordering::SeqCst), 1);
    assert!(store.inner.documents("uploads").await.is_empty());

    // The instance keeps the transformed values but nothing is left to send.
    assert_eq!(
        file.get("deleted_at"),
        Some(&Bson::DateTime(bson::DateTime::from_millis(1)))
    );
    assert_eq!(file.get("path"), Some(&Bson::from("/dev/null")));
    assert!(file.pending_update().is_empty());
    assert_eq!(store.updates(), 0);
}
