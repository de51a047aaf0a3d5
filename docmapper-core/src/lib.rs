//! Core of the docmapper object-document mapper.
//!
//! This crate provides:
//!
//! - **Field types** ([`types`]) - Reusable field types with validators, helpers and transforms
//! - **Schema compiler** ([`schema`]) - Declarative schemas compiled into shared descriptors, and the registry holding them
//! - **Instances** ([`document`]) - Materialized documents with dirty tracking, save and destroy
//! - **Lifecycle tracking** ([`lifecycle`]) - New/persisted state and the accumulated partial update
//! - **Collection proxies** ([`embedded`], [`linked`]) - Inline and out-of-document arrays of sub-documents
//! - **Validation** ([`validation`]) - Concurrent field and object level validation
//! - **Transforms** ([`transform`]) - Derived fields and side effects before create, update and remove
//! - **Update compiler** ([`update`]) - Selector choice for partial updates
//! - **Store backend abstraction** ([`backend`]) - The gateway every storage backend implements
//! - **Selectors** ([`query`]) - The selector subset the mapper issues
//! - **Mapper and models** ([`mapper`], [`model`], [`collection`]) - Entry points for callers
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use docmapper::prelude::*;
//!
//! let registry = Registry::new();
//! let user = registry.define("User", |s| {
//!     s.field("name").of(Kind::String);
//!     s.field("age").of(Kind::Number);
//!     s.in_collection("users");
//!     Ok(())
//! })?;
//!
//! let mapper = Mapper::connect(registry, backend).await?;
//! let mut alice = mapper.model(&user).create(doc! { "name": "Alice", "age": 30 })?;
//! alice.save().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_core;

pub mod backend;
pub mod collection;
pub mod document;
pub mod embedded;
pub mod error;
pub mod lifecycle;
pub mod linked;
pub mod mapper;
pub mod model;
pub mod query;
pub mod schema;
pub mod transform;
pub mod types;
pub mod update;
pub mod validation;
