mod common;

use docmapper::{
    bson::{Bson, doc, oid::ObjectId},
    memory::InMemoryStore,
    prelude::*,
};
use serde::{Deserialize, Serialize};

use common::{connect, person_schema};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Person {
    name: String,
    age: i32,
}

#[tokio::test]
async fn created_instances_get_unique_ids_and_stay_new_until_saved() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, _) = connect(registry).await;
    let people = mapper.model(&person);

    let mut first = people.create(doc! { "name": "Ann", "age": 30 }).unwrap();
    let second = people.create(doc! { "name": "Bob", "age": 40 }).unwrap();

    assert!(matches!(first.id(), Bson::ObjectId(_)));
    assert_ne!(first.id(), second.id());
    assert!(first.is_new());

    first.save().await.unwrap();
    assert!(!first.is_new());
    assert!(second.is_new());
}

#[tokio::test]
async fn supplied_id_is_kept() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, _) = connect(registry).await;

    let id = ObjectId::new();
    let mut ann = mapper
        .model(&person)
        .create(doc! { "_id": id, "name": "Ann", "age": 30 })
        .unwrap();
    assert!(ann.is_new());
    ann.save().await.unwrap();

    let stored = mapper
        .collection("people")
        .unwrap()
        .find_one(Filter::eq("_id", id))
        .await
        .unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn saving_twice_without_changes_writes_once() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, store) = connect(registry).await;

    let mut ann = mapper.model(&person).create(doc! { "name": "Ann", "age": 30 }).unwrap();
    ann.save().await.unwrap();
    ann.save().await.unwrap();

    assert_eq!(store.inserts(), 1);
    assert_eq!(store.updates(), 0);
}

#[tokio::test]
async fn saved_values_round_trip() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, _) = connect(registry).await;
    let people = mapper.model(&person);

    let mut ann = people
        .create_from(&Person { name: "Ann".into(), age: 30 })
        .unwrap();
    ann.save().await.unwrap();

    let found = people
        .find_one(Filter::eq("_id", ann.id().clone()))
        .await
        .unwrap()
        .unwrap();
    assert!(!found.is_new());
    assert_eq!(found.get("name"), Some(&Bson::from("Ann")));
    assert_eq!(found.get("age"), Some(&Bson::Int32(30)));
    assert_eq!(found.deserialize::<Person>().unwrap(), Person { name: "Ann".into(), age: 30 });
}

#[tokio::test]
async fn changing_one_field_updates_only_that_path() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, store) = connect(registry).await;

    let mut ann = mapper.model(&person).create(doc! { "name": "Ann", "age": 30 }).unwrap();
    ann.save().await.unwrap();

    ann.set("age", 31).unwrap();
    assert_eq!(ann.pending_update().sets(), &doc! { "age": 31 });
    ann.save().await.unwrap();

    let update = store.last_update().unwrap();
    assert_eq!(update.to_document(), doc! { "$set": { "age": 31 } });
    assert!(ann.pending_update().is_empty());

    let stored = store.inner.documents("people").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get_str("name").unwrap(), "Ann");
    assert_eq!(stored[0].get_i32("age").unwrap(), 31);
}

#[tokio::test]
async fn writes_to_new_instances_are_not_recorded() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, _) = connect(registry).await;

    let mut ann = mapper.model(&person).create(doc! { "name": "Ann" }).unwrap();
    ann.set("age", 3).unwrap();

    assert!(ann.pending_update().is_empty());
    assert_eq!(ann.get("age"), Some(&Bson::Int32(3)));
}

#[tokio::test]
async fn transient_fields_are_never_persisted() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, store) = connect(registry).await;

    let mut ann = mapper
        .model(&person)
        .create(doc! { "name": "Ann", "scratch": "in memory" })
        .unwrap();
    assert_eq!(ann.get("scratch"), Some(&Bson::from("in memory")));
    assert!(ann.to_document().get("scratch").is_none());
    ann.save().await.unwrap();

    ann.set("scratch", "changed").unwrap();
    assert!(ann.pending_update().is_empty());
    ann.save().await.unwrap();

    assert_eq!(store.updates(), 0);
    assert!(store.inner.documents("people").await[0].get("scratch").is_none());
}

#[tokio::test]
async fn undeclared_fields_are_rejected() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, _) = connect(registry).await;

    let mut ann = mapper.model(&person).create(doc! { "name": "Ann" }).unwrap();
    assert!(matches!(ann.set("nickname", "A"), Err(MapperError::UnknownField(_))));
}

#[tokio::test]
async fn decorated_values_unwrap_when_written_back() {
    let registry = Registry::new();
    let upper = FieldType::define(|t| {
        t.of(Kind::String).helper("upper", |value| {
            value.as_str().map(str::to_uppercase).map(Bson::from).unwrap_or(Bson::Null)
        })
    });
    let tag = registry
        .define("Tag", |s| {
            s.field("label").of(upper.clone());
            s.field("copy").of(Kind::String);
            s.in_collection("tags");
            Ok(())
        })
        .unwrap();
    let (mapper, _) = connect(registry).await;

    let mut rust = mapper.model(&tag).create(doc! { "label": "rust" }).unwrap();
    let label = rust.value("label").unwrap();
    assert_eq!(label.call("upper"), Some(Bson::from("RUST")));
    assert_eq!(label.helpers(), vec!["upper"]);
    assert_eq!(label.as_str(), Some("rust"));

    rust.set("copy", label).unwrap();
    assert_eq!(rust.get("copy"), Some(&Bson::from("rust")));
}

#[tokio::test]
async fn updating_a_removed_document_is_not_found() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, store) = connect(registry).await;

    let mut ann = mapper.model(&person).create(doc! { "name": "Ann" }).unwrap();
    ann.save().await.unwrap();
    store.inner.remove("people", &Expr::all()).await.unwrap();

    ann.set("age", 5).unwrap();
    let err = ann.save().await.unwrap_err();
    assert!(matches!(err, MapperError::DocumentNotFound(_, ref collection) if collection == "people"));
    assert!(!ann.pending_update().is_empty());

    assert!(matches!(ann.destroy().await, Err(MapperError::DocumentNotFound(_, _))));
}

#[tokio::test]
async fn destroy_removes_the_document() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, store) = connect(registry).await;

    let mut ann = mapper.model(&person).create(doc! { "name": "Ann" }).unwrap();
    ann.save().await.unwrap();
    ann.destroy().await.unwrap();

    assert!(store.inner.documents("people").await.is_empty());
}

#[tokio::test]
async fn operations_after_close_fail_with_precondition() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let mapper = Mapper::connect(registry, InMemoryStore::new()).await.unwrap();
    let people = mapper.model(&person);

    let mut ann = people.create(doc! { "name": "Ann" }).unwrap();
    mapper.close().await.unwrap();

    assert!(matches!(ann.save().await, Err(MapperError::Precondition(_))));
    assert!(matches!(people.find_one(Expr::all()).await, Err(MapperError::Precondition(_))));
    assert!(matches!(mapper.collection("people"), Err(MapperError::Precondition(_))));
}

#[tokio::test]
async fn update_one_and_get_returns_the_post_image() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, _) = connect(registry).await;
    let people = mapper.model(&person);

    let mut ann = people.create(doc! { "name": "Ann", "age": 30 }).unwrap();
    ann.save().await.unwrap();

    let updated = people
        .find(Filter::eq("name", "Ann"))
        .update_one_and_get(UpdateStatement::new().inc("age", 1).set("name", "Anne"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.id(), ann.id());
    assert_eq!(updated.get("age"), Some(&Bson::Int32(31)));
    assert_eq!(updated.get("name"), Some(&Bson::from("Anne")));

    let missing = people
        .find(Filter::eq("name", "Nobody"))
        .update_one_and_get(UpdateStatement::new().inc("age", 1))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn methods_run_against_the_instance() {
    let registry = Registry::new();
    let counter = registry
        .define("Counter", |s| {
            s.field("n").of(Kind::Number);
            s.method("bump", |doc, args| {
                let by = args.first().and_then(Bson::as_i32).unwrap_or(1);
                let n = doc.get("n").and_then(Bson::as_i32).unwrap_or(0) + by;
                doc.set("n", n)?;
                Ok(Bson::Int32(n))
            });
            s.in_collection("counters");
            Ok(())
        })
        .unwrap();
    let (mapper, _) = connect(registry).await;

    let mut hits = mapper.model(&counter).create(doc! { "n": 1 }).unwrap();
    assert_eq!(hits.call("bump", &[Bson::Int32(2)]).unwrap(), Bson::Int32(3));
    assert!(matches!(hits.call("reset", &[]), Err(MapperError::UnknownField(_))));
}

#[tokio::test]
async fn json_rendering_matches_stored_layout() {
    let registry = Registry::new();
    let person = person_schema(&registry);
    let (mapper, _) = connect(registry).await;

    let ann = mapper
        .model(&person)
        .create(doc! { "_id": "ann", "name": "Ann", "age": 30, "scratch": 1 })
        .unwrap();

    assert_eq!(
        ann.to_json().unwrap(),
        serde_json::json!({ "_id": "ann", "name": "Ann", "age": 30 })
    );
}
