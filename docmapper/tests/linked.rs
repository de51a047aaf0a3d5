mod common;

use std::sync::Arc;

use docmapper::{
    bson::{Bson, doc},
    prelude::*,
};

use common::connect;

fn schemas(registry: &Registry, cardinality: &str) -> (Arc<Schema>, Arc<Schema>) {
    let comment = registry
        .define("Comment", |s| {
            s.field("text").of(Kind::String);
            s.foreign_key(
                ForeignKey::to("Post")
                    .using("_id")
                    .through("comments")
                    .as_key("post_id")
                    .exposed_as("post"),
            );
            s.in_collection("comments");
            Ok(())
        })
        .unwrap();
    let post = registry
        .define("Post", |s| {
            s.field("title").of(Kind::String);
            s.field("comments").linked_array_of(&comment).with(cardinality)?;
            s.in_collection("posts");
            Ok(())
        })
        .unwrap();
    (comment, post)
}

async fn post_with_comments(mapper: &Mapper, post: &Arc<Schema>, comment: &Arc<Schema>) -> Instance {
    let mut first = mapper.model(post).create(doc! { "title": "First" }).unwrap();
    let comments = mapper.model(comment);
    let linked = first.linked_mut("comments").unwrap();
    for text in ["c0", "c1", "c2"] {
        linked.push(comments.create(doc! { "text": text }).unwrap()).unwrap();
    }
    first.save().await.unwrap();
    first
}

#[tokio::test]
async fn pushed_children_are_saved_after_the_parent() {
    let registry = Registry::new();
    let (comment, post) = schemas(&registry, "0:n");
    let (mapper, store) = connect(registry).await;

    let mut first = mapper.model(&post).create(doc! { "title": "First" }).unwrap();
    let id = first.id().clone();
    let linked = first.linked_mut("comments").unwrap();
    linked
        .push(mapper.model(&comment).create(doc! { "text": "hello" }).unwrap())
        .unwrap();
    assert_eq!(linked.pending().len(), 1);
    assert_eq!(linked.length().await.unwrap(), 1);
    assert_eq!(linked.pending()[0].get("post_id"), Some(&id));
    assert_eq!(store.inserts(), 0);

    first.save().await.unwrap();
    assert_eq!(store.inserts(), 2);

    let stored = store.inner.documents("comments").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("post_id"), Some(first.id()));
    // Linked children are not stored inline.
    assert!(store.inner.documents("posts").await[0].get("comments").is_none());

    let linked = first.linked_mut("comments").unwrap();
    assert!(linked.pending().is_empty());
    assert_eq!(linked.length().await.unwrap(), 1);
}

#[tokio::test]
async fn children_are_addressed_by_position() {
    let registry = Registry::new();
    let (comment, post) = schemas(&registry, "0:n");
    let (mapper, _) = connect(registry).await;
    let mut first = post_with_comments(&mapper, &post, &comment).await;

    let linked = first.linked_mut("comments").unwrap();
    assert_eq!(linked.length().await.unwrap(), 3);

    let second = linked.get(1).await.unwrap().unwrap();
    assert!(!second.is_new());
    assert_eq!(second.get("text"), Some(&Bson::from("c1")));
    assert!(linked.get(3).await.unwrap().is_none());

    let texts: Vec<&Bson> = linked
        .find(Expr::all())
        .skip(1)
        .limit(2)
        .load()
        .await
        .unwrap()
        .into_iter()
        .filter_map(|child| child.get("text"))
        .collect();
    assert_eq!(texts, vec![&Bson::from("c1"), &Bson::from("c2")]);

    let matching = linked.find(Filter::eq("text", "c2")).load().await.unwrap();
    assert_eq!(matching.len(), 1);
}

#[tokio::test]
async fn filtered_finds_leave_positions_alone() {
    let registry = Registry::new();
    let (comment, post) = schemas(&registry, "0:n");
    let (mapper, _) = connect(registry).await;
    let mut first = post_with_comments(&mapper, &post, &comment).await;

    let linked = first.linked_mut("comments").unwrap();
    let matching = linked.find(Filter::eq("text", "c2")).load().await.unwrap();
    assert_eq!(matching[0].get("text"), Some(&Bson::from("c2")));
    assert_eq!(matching[0].parent().unwrap().index, None);

    let head = linked.get(0).await.unwrap().unwrap();
    assert_eq!(head.get("text"), Some(&Bson::from("c0")));
    assert_eq!(head.parent().unwrap().index, Some(0));

    // A filtered result that is already cached is the cached child.
    linked.get(2).await.unwrap().unwrap().set("text", "c2*").unwrap();
    let matching = linked.find(Filter::ne("text", "missing")).load().await.unwrap();
    let texts: Vec<&Bson> = matching.iter().filter_map(|child| child.get("text")).collect();
    assert_eq!(texts, vec![&Bson::from("c0"), &Bson::from("c1"), &Bson::from("c2*")]);

    // Validation walks every child once, by position.
    assert!(first.validate().await.unwrap().is_empty());
}

#[tokio::test]
async fn loaded_children_save_on_their_own() {
    let registry = Registry::new();
    let (comment, post) = schemas(&registry, "0:n");
    let (mapper, store) = connect(registry).await;
    let mut first = post_with_comments(&mapper, &post, &comment).await;

    let child = first
        .linked_mut("comments")
        .unwrap()
        .get(0)
        .await
        .unwrap()
        .unwrap();
    child.set("text", "edited").unwrap();
    child.save().await.unwrap();

    assert_eq!(
        store.last_update().unwrap().to_document(),
        doc! { "$set": { "text": "edited" } }
    );
    let texts: Vec<String> = store
        .inner
        .documents("comments")
        .await
        .iter()
        .map(|document| document.get_str("text").unwrap().to_string())
        .collect();
    assert!(texts.contains(&"edited".to_string()));
}

#[tokio::test]
async fn children_load_their_parent_through_the_alias() {
    let registry = Registry::new();
    let (comment, post) = schemas(&registry, "0:n");
    let (mapper, _) = connect(registry).await;
    let first = post_with_comments(&mapper, &post, &comment).await;

    let reply = mapper
        .model(&comment)
        .find_one(Filter::eq("text", "c0"))
        .await
        .unwrap()
        .unwrap();
    let parent = reply.related("post").await.unwrap().unwrap();
    assert_eq!(parent.id(), first.id());
    assert_eq!(parent.get("title"), Some(&Bson::from("First")));

    assert!(matches!(
        reply.related("author").await,
        Err(MapperError::UnknownField(_))
    ));

    let orphan = mapper.model(&comment).create(doc! { "text": "alone" }).unwrap();
    assert!(orphan.related("post").await.unwrap().is_none());
}

#[tokio::test]
async fn clear_removes_every_child() {
    let registry = Registry::new();
    let (comment, post) = schemas(&registry, "0:n");
    let (mapper, store) = connect(registry).await;
    let mut first = post_with_comments(&mapper, &post, &comment).await;

    let mut other = mapper.model(&post).create(doc! { "title": "Other" }).unwrap();
    other
        .linked_mut("comments")
        .unwrap()
        .push(mapper.model(&comment).create(doc! { "text": "kept" }).unwrap())
        .unwrap();
    other.save().await.unwrap();

    let linked = first.linked_mut("comments").unwrap();
    assert_eq!(linked.clear().await.unwrap(), 3);
    assert_eq!(linked.length().await.unwrap(), 0);
    assert!(linked.get(0).await.unwrap().is_none());

    let stored = store.inner.documents("comments").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get_str("text").unwrap(), "kept");
}

#[tokio::test]
async fn cardinality_counts_stored_and_pending_children() {
    let registry = Registry::new();
    let (comment, post) = schemas(&registry, "1:2");
    let (mapper, store) = connect(registry).await;

    let mut empty = mapper.model(&post).create(doc! { "title": "Empty" }).unwrap();
    let err = empty.save().await.unwrap_err();
    let errors = err.validation_errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.iter().next().unwrap().message, "comments requires at least 1 elements");
    assert_eq!(store.inserts(), 0);

    let comments = mapper.model(&comment);
    let linked = empty.linked_mut("comments").unwrap();
    linked.push(comments.create(doc! { "text": "a" }).unwrap()).unwrap();
    empty.save().await.unwrap();

    let linked = empty.linked_mut("comments").unwrap();
    linked.push(comments.create(doc! { "text": "b" }).unwrap()).unwrap();
    linked.push(comments.create(doc! { "text": "c" }).unwrap()).unwrap();
    let errors = empty.validate().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "comments requires at most 2 elements");
}

#[tokio::test]
async fn raw_children_given_at_creation_are_pending() {
    let registry = Registry::new();
    let (_, post) = schemas(&registry, "0:n");
    let (mapper, store) = connect(registry).await;

    let mut first = mapper
        .model(&post)
        .create(doc! { "title": "First", "comments": [{ "text": "x" }, { "text": "y" }] })
        .unwrap();
    assert_eq!(first.linked_mut("comments").unwrap().pending().len(), 2);
    assert!(first.to_document().get("comments").is_none());

    first.save().await.unwrap();
    assert_eq!(store.inner.documents("comments").await.len(), 2);
}
