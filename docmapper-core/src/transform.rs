//! Transform pipeline run before inserts, updates and deletes.
//!
//! Field transforms lifted from field types run concurrently; each receives the field's
//! current value and its output is stored back under that field. Object transforms run
//! afterwards, one at a time in registration order, with exclusive access to the
//! instance. The first failing transform aborts the pipeline.

use async_trait::async_trait;
use bson::Bson;
use futures::future::try_join_all;
use std::{fmt, sync::Arc};

use crate::{
    document::Instance,
    error::MapperResult,
    types::{FieldTransform, Stage},
};

/// A side-effecting step run against the whole instance.
///
/// Implemented for every synchronous `Fn(&mut Instance) -> MapperResult<()>`.
#[async_trait]
pub trait ObjectTransform: Send + Sync {
    async fn apply(&self, document: &mut Instance) -> MapperResult<()>;
}

#[async_trait]
impl<F> ObjectTransform for F
where
    F: Fn(&mut Instance) -> MapperResult<()> + Send + Sync,
{
    async fn apply(&self, document: &mut Instance) -> MapperResult<()> {
        (self)(document)
    }
}

/// A schema-level transform.
#[derive(Clone)]
pub enum TransformEntry {
    /// A field type's transform, lifted into the schema and tagged with its field.
    Field {
        field: String,
        transform: Arc<dyn FieldTransform>,
    },
    Object(Arc<dyn ObjectTransform>),
}

impl fmt::Debug for TransformEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformEntry::Field { field, .. } => write!(f, "TransformEntry::Field({})", field),
            TransformEntry::Object(_) => f.write_str("TransformEntry::Object"),
        }
    }
}

impl Instance {
    /// Runs the transforms registered for `stage`.
    ///
    /// Outputs of field transforms go through [`Instance::set`] before an update, so they
    /// are recorded like any mutation. Before an insert or a delete they are stored
    /// without being recorded.
    pub(crate) async fn run_transforms(&mut self, stage: Stage) -> MapperResult<()> {
        let schema = self.schema().clone();
        let entries = schema.transforms().for_stage(stage);
        if entries.is_empty() {
            return Ok(());
        }
        tracing::debug!(schema = %schema.name(), ?stage, count = entries.len(), "running transforms");

        let field_transforms = entries.iter().filter_map(|entry| match entry {
            TransformEntry::Field { field, transform } => Some((field, transform)),
            TransformEntry::Object(_) => None,
        });
        let outputs = try_join_all(field_transforms.map(|(field, transform)| {
            let current = self.get(field).cloned().unwrap_or(Bson::Null);
            async move { transform.transform(current).await.map(|value| (field, value)) }
        }))
        .await?;

        for (field, value) in outputs {
            match stage {
                Stage::Update => self.set(field, value)?,
                Stage::New | Stage::Remove => self.store(field, value)?,
            }
        }

        for entry in entries {
            if let TransformEntry::Object(transform) = entry {
                transform.apply(self).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_debug_by_field() {
        let entry = TransformEntry::Field {
            field: "created".into(),
            transform: Arc::new(|value: Bson| -> MapperResult<Bson> { Ok(value) }),
        };
        assert_eq!(format!("{:?}", entry), "TransformEntry::Field(created)");
    }
}
