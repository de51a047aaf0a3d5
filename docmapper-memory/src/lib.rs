//! In-memory storage backend for docmapper.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is meant for development
//! and tests.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Dotted paths** - Selectors and updates reach into sub-documents and arrays
//! - **Partial updates** - `$set`, `$push` and `$inc`, including the positional `$` segment
//! - **Projections** - First-matching-element projection for embedded lookups
//!
//! # Quick Start
//!
//! ```ignore
//! use docmapper::{mapper::Mapper, schema::Registry, types::Kind};
//! use docmapper::memory::InMemoryStore;
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::new();
//!     let user = registry.define("User", |s| {
//!         s.field("name").of(Kind::String);
//!         s.in_collection("users");
//!         Ok(())
//!     })?;
//!
//!     let mapper = Mapper::connect(registry, InMemoryStore::new()).await?;
//!     let mut alice = mapper.model(&user).create(doc! { "name": "Alice" })?;
//!     alice.save().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_memory;

pub mod store;
pub(crate) mod evaluator;
pub(crate) mod update;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
