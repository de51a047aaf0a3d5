mod common;

use std::time::Duration;

use async_trait::async_trait;
use docmapper::{
    bson::{Bson, doc},
    prelude::*,
    validation::CUSTOM_FIELD,
};

use common::connect;

fn slow_rejection(delay_ms: u64) -> FieldType {
    FieldType::define(move |t| {
        t.of(Kind::String).validate_async(move |field, _| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Err::<(), Violations>(format!("{} was rejected after {}ms", field, delay_ms).into())
        })
    })
}

#[tokio::test]
async fn every_async_field_failure_is_reported() {
    let registry = Registry::new();
    let form = registry
        .define("Form", |s| {
            s.field("slow").of(slow_rejection(30));
            s.field("fast").of(slow_rejection(5));
            s.field("free").of(Kind::String);
            s.in_collection("forms");
            Ok(())
        })
        .unwrap();
    let (mapper, store) = connect(registry).await;

    let mut entry = mapper
        .model(&form)
        .create(doc! { "slow": "a", "fast": "b", "free": "c" })
        .unwrap();
    let err = entry.save().await.unwrap_err();

    let errors: Vec<&str> = err
        .validation_errors()
        .unwrap()
        .iter()
        .map(|error| error.field.as_str())
        .collect();
    // Declaration order, regardless of which validator finished first.
    assert_eq!(errors, vec!["slow", "fast"]);
    assert_eq!(store.inserts(), 0);
    assert!(entry.is_new());
}

#[tokio::test]
async fn extended_types_run_every_validator_in_the_chain() {
    let email = FieldType::define(|t| {
        t.of(Kind::String).validate(|field, value| match value.as_str() {
            Some(s) if s.contains('@') => Ok(()),
            _ => Err(format!("{} is not an email address", field).into()),
        })
    });
    let corporate = email.extend(|t| {
        t.validate(|field, value| match value.as_str() {
            Some(s) if s.ends_with("@example.com") => Ok(()),
            _ => Err(format!("{} must be a corporate address", field).into()),
        })
    });

    let registry = Registry::new();
    let staff = registry
        .define("Staff", |s| {
            s.field("email").of(corporate.clone());
            s.in_collection("staff");
            Ok(())
        })
        .unwrap();
    let (mapper, _) = connect(registry).await;
    let model = mapper.model(&staff);

    let mut outsider = model.create(doc! { "email": "bob@other.org" }).unwrap();
    let errors = outsider.validate().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "email must be a corporate address");

    let mut garbage = model.create(doc! { "email": "nobody" }).unwrap();
    assert_eq!(garbage.validate().await.unwrap().len(), 2);

    let mut insider = model.create(doc! { "email": "ann@example.com" }).unwrap();
    assert!(insider.validate().await.unwrap().is_empty());
    insider.save().await.unwrap();
}

struct AdultsOnly;

#[async_trait]
impl AsyncObjectValidator for AdultsOnly {
    async fn validate(&self, document: &Instance) -> Result<(), Violations> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        match document.get("age").and_then(Bson::as_i32) {
            Some(age) if age >= 18 => Ok(()),
            _ => Err(Violation::on_field("age", "members must be adults").into()),
        }
    }
}

#[tokio::test]
async fn object_validators_run_after_fields_and_tag_their_errors() {
    let number = FieldType::define(|t| {
        t.of(Kind::Number).validate(|field, value| {
            if Kind::Number.accepts(value) {
                Ok(())
            } else {
                Err(format!("{} must be a number", field).into())
            }
        })
    });

    let registry = Registry::new();
    let member = registry
        .define("Member", |s| {
            s.field("name").of(Kind::String);
            s.field("age").of(number.clone());
            s.validate_before(Stage::New, |document| match document.get("name") {
                Some(Bson::String(name)) if !name.is_empty() => Ok(()),
                _ => Err("a member needs a name".into()),
            });
            s.validate_async_before(Stage::New, AdultsOnly);
            s.in_collection("members");
            Ok(())
        })
        .unwrap();
    let (mapper, _) = connect(registry).await;

    let mut kid = mapper
        .model(&member)
        .create(doc! { "name": "", "age": "twelve" })
        .unwrap();
    let errors = kid.validate().await.unwrap();

    let tagged: Vec<(&str, &str)> = errors
        .iter()
        .map(|error| (error.field.as_str(), error.message.as_str()))
        .collect();
    assert_eq!(
        tagged,
        vec![
            ("age", "age must be a number"),
            (CUSTOM_FIELD, "a member needs a name"),
            ("age", "members must be adults"),
        ]
    );
    assert!(errors[0].rule.is_some());
    assert!(errors[1].rule.is_none());
}

#[tokio::test]
async fn update_validators_only_run_on_persisted_documents() {
    let registry = Registry::new();
    let account = registry
        .define("Account", |s| {
            s.field("balance").of(Kind::Number);
            s.validate_before(Stage::Update, |document| {
                match document.get("balance").and_then(Bson::as_i32) {
                    Some(balance) if balance < 0 => Err("balance cannot go negative".into()),
                    _ => Ok(()),
                }
            });
            s.in_collection("accounts");
            Ok(())
        })
        .unwrap();
    let (mapper, store) = connect(registry).await;

    let mut overdrawn = mapper
        .model(&account)
        .create(doc! { "balance": -5 })
        .unwrap();
    overdrawn.save().await.unwrap();

    overdrawn.set("balance", -10).unwrap();
    let err = overdrawn.save().await.unwrap_err();
    assert_eq!(err.validation_errors().unwrap().len(), 1);
    assert_eq!(store.updates(), 0);

    overdrawn.set("balance", 10).unwrap();
    overdrawn.save().await.unwrap();
    assert_eq!(store.updates(), 1);
}

#[tokio::test]
async fn remove_validators_block_destroy() {
    let registry = Registry::new();
    let record = registry
        .define("Record", |s| {
            s.field("locked").of(Kind::Boolean);
            s.validate_before(Stage::Remove, |document| {
                if document.get("locked") == Some(&Bson::Boolean(true)) {
                    Err(Violation::on_field("locked", "locked records cannot be removed").into())
                } else {
                    Ok(())
                }
            });
            s.in_collection("records");
            Ok(())
        })
        .unwrap();
    let (mapper, store) = connect(registry).await;

    let mut locked = mapper.model(&record).create(doc! { "locked": true }).unwrap();
    // Remove validators do not take part in saving.
    locked.save().await.unwrap();

    let err = locked.destroy().await.unwrap_err();
    let errors = err.validation_errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.iter().next().unwrap().field, "locked");
    assert_eq!(store.inner.documents("records").await.len(), 1);

    locked.set("locked", false).unwrap();
    locked.save().await.unwrap();
    locked.destroy().await.unwrap();
    assert!(store.inner.documents("records").await.is_empty());
}

#[tokio::test]
async fn element_errors_carry_their_position() {
    let zip = FieldType::define(|t| {
        t.of(Kind::String).validate(|field, value| match value.as_str() {
            Some(s) if s.len() == 4 => Ok(()),
            _ => Err(format!("{} must have four digits", field).into()),
        })
    });

    let registry = Registry::new();
    let address = registry
        .define("Address", |s| {
            s.field("zip").of(zip.clone());
            s.embedded_in("people", "addresses");
            Ok(())
        })
        .unwrap();
    let person = registry
        .define("Person", |s| {
            s.field("addresses").embedded_array_of(&address).with("0:2")?;
            s.in_collection("people");
            Ok(())
        })
        .unwrap();
    let (mapper, _) = connect(registry).await;

    let mut ann = mapper
        .model(&person)
        .create(doc! { "addresses": [{ "zip": "1000" }, { "zip": "12" }] })
        .unwrap();
    let errors = ann.validate().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field, "zip");
    assert_eq!(errors[0].context.parent.as_deref(), Some("addresses"));
    assert_eq!(errors[0].context.index, Some(1));

    ann.embedded_mut("addresses").unwrap().push_values(doc! { "zip": "3000" }).unwrap();
    let errors = ann.validate().await.unwrap();
    // An array over its bounds reports the bound only.
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "addresses requires at most 2 elements");
}
