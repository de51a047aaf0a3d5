//! Convenient re-exports of commonly used types from docmapper.
//!
//! ```ignore
//! use docmapper::prelude::*;
//! ```
//!
//! This provides access to:
//! - Registries, schema builders and field types
//! - Mappers, models and instances
//! - Selector construction
//! - Storage backend traits
//! - Error and validation types

pub use docmapper_core::{
    backend::{IndexSpec, StoreBackend, StoreBackendBuilder},
    collection::Collection,
    document::{FieldValue, Instance, Placement},
    embedded::EmbeddedArray,
    error::{MapperError, MapperResult},
    lifecycle::UpdateStatement,
    linked::LinkedArray,
    mapper::{Mapper, MapperBuilder},
    model::Model,
    query::{Expr, FieldOp, Filter, Query, QueryBuilder, QueryVisitor, Sort, SortDirection},
    schema::{ForeignKey, Registry, Schema, SchemaBuilder},
    transform::ObjectTransform,
    types::{FieldTransform, FieldType, Kind, Stage},
    validation::{AsyncObjectValidator, ValidationError, ValidationErrors, Violation, Violations},
};
