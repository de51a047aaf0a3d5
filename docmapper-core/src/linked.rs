//! Arrays of documents stored in their own collection.
//!
//! Membership is a query: children carry a foreign key holding the value of the
//! parent's key field, and the array loads them on demand, ordered by `_id`. Children
//! loaded by position or by an unfiltered query are cached by position; the cache is only
//! dropped by [`LinkedArray::clear`]. Results of a filtered query are not positions and
//! are kept apart from it.
//! Pushed children are saved after their parent is.

use bson::{Bson, Document};
use futures::future::try_join_all;
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    document::{Binding, Instance, ParentLink, Placement},
    error::{MapperError, MapperResult},
    mapper::Connection,
    query::{Expr, Filter, Query, SortDirection},
    schema::{CollectionKind, ForeignKey, Schema},
};

#[derive(Debug)]
pub struct LinkedArray {
    field: String,
    schema: Arc<Schema>,
    key: ForeignKey,
    parent_key: Bson,
    cache: BTreeMap<usize, Instance>,
    found: Vec<Instance>,
    pending: Vec<Instance>,
    connection: Connection,
}

impl LinkedArray {
    /// Binds the array; documents present in `raw` become pending children.
    pub(crate) fn bind(
        owner: &Instance,
        field: &str,
        schema: Arc<Schema>,
        raw: Option<Bson>,
    ) -> MapperResult<LinkedArray> {
        let key = schema.foreign_key(field).cloned().ok_or_else(|| {
            MapperError::Configuration(format!(
                "schema {} declares no foreign key through {}",
                schema.name(),
                field
            ))
        })?;
        let parent_key = owner.get(&key.parent_field).cloned().unwrap_or(Bson::Null);

        let mut array = LinkedArray {
            field: field.to_string(),
            schema,
            key,
            parent_key,
            cache: BTreeMap::new(),
            found: Vec::new(),
            pending: Vec::new(),
            connection: owner.connection.clone(),
        };

        if let Some(Bson::Array(raw)) = raw {
            for element in raw {
                let Bson::Document(values) = element else {
                    return Err(MapperError::InvalidDocument(format!(
                        "element of linked array {} is not a document",
                        field
                    )));
                };
                let child = Instance::bind(
                    array.schema.clone(),
                    values,
                    Binding::new(Placement::for_target(array.schema.target())),
                    array.connection.clone(),
                )?;
                array.push(child)?;
            }
        }

        Ok(array)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn foreign_key(&self) -> &ForeignKey {
        &self.key
    }

    pub(crate) fn set_parent_key(&mut self, parent_key: Bson) {
        self.parent_key = parent_key;
    }

    fn collection(&self) -> &str {
        self.schema.target().collection()
    }

    fn selector(&self) -> Expr {
        Filter::eq(self.key.child_field.clone(), self.parent_key.clone())
    }

    fn materialize(&self, document: Document, index: Option<usize>) -> MapperResult<Instance> {
        let mut binding = Binding::new(Placement::for_target(self.schema.target())).persisted();
        binding.parent = Some(ParentLink {
            id: self.parent_key.clone(),
            field: self.field.clone(),
            index,
            kind: CollectionKind::Linked,
        });
        Instance::bind(self.schema.clone(), document, binding, self.connection.clone())
    }

    /// Returns the child at `index`, ordered by `_id`, loading it if it is not cached.
    pub async fn get(&mut self, index: usize) -> MapperResult<Option<&mut Instance>> {
        if !self.cache.contains_key(&index) {
            let backend = self.connection.backend()?;
            let query = Query::builder()
                .filter(self.selector())
                .sort("_id", SortDirection::Asc)
                .offset(index)
                .limit(1)
                .build();
            tracing::debug!(collection = %self.collection(), ?query, "loading linked document");

            let Some(document) = backend.find(self.collection(), query).await?.into_iter().next()
            else {
                return Ok(None);
            };
            let child = self.materialize(document, Some(index))?;
            self.cache.insert(index, child);
        }
        Ok(self.cache.get_mut(&index))
    }

    /// Starts a query over the children matching `selector`.
    pub fn find(&mut self, selector: Expr) -> LinkedQuery<'_> {
        LinkedQuery {
            array: self,
            selector,
            skip: None,
            limit: None,
        }
    }

    /// Appends a child. Its foreign key is set now and it is saved after the parent.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidDocument`] if the child is of another schema.
    pub fn push(&mut self, mut child: Instance) -> MapperResult<()> {
        if child.schema().name() != self.schema.name() {
            return Err(MapperError::InvalidDocument(format!(
                "{} cannot hold {} documents",
                self.field,
                child.schema().name()
            )));
        }
        child.set(&self.key.child_field, self.parent_key.clone())?;
        child.parent = Some(ParentLink {
            id: self.parent_key.clone(),
            field: self.field.clone(),
            index: None,
            kind: CollectionKind::Linked,
        });
        self.pending.push(child);
        Ok(())
    }

    /// Children pushed since the parent was last saved.
    pub fn pending(&self) -> &[Instance] {
        &self.pending
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Deletes every child of the parent and forgets cached and pending children.
    ///
    /// # Returns
    ///
    /// The number of children deleted.
    pub async fn clear(&mut self) -> MapperResult<u64> {
        let backend = self.connection.backend()?;
        let selector = self.selector();
        tracing::debug!(collection = %self.collection(), ?selector, "clearing linked documents");
        let removed = backend.remove(self.collection(), &selector).await?;
        self.cache.clear();
        self.found.clear();
        self.pending.clear();
        Ok(removed)
    }

    /// Number of stored children plus pending ones.
    pub async fn length(&self) -> MapperResult<usize> {
        Ok(self.stored_count().await? + self.pending.len())
    }

    async fn stored_count(&self) -> MapperResult<usize> {
        let backend = self.connection.backend()?;
        let count = backend.count(self.collection(), &self.selector()).await?;
        Ok(count as usize)
    }

    /// Loads every stored child not cached yet and returns the length.
    pub(crate) async fn load_all(&mut self) -> MapperResult<usize> {
        let stored = self.stored_count().await?;
        if (0..stored).any(|index| !self.cache.contains_key(&index)) {
            let backend = self.connection.backend()?;
            let query = Query::builder()
                .filter(self.selector())
                .sort("_id", SortDirection::Asc)
                .build();
            let documents = backend.find(self.collection(), query).await?;
            for (index, document) in documents.into_iter().enumerate() {
                if !self.cache.contains_key(&index) {
                    let child = self.materialize(document, Some(index))?;
                    self.cache.insert(index, child);
                }
            }
        }
        Ok(stored + self.pending.len())
    }

    /// Cached children in position order, then pending ones.
    pub(crate) fn loaded_mut(&mut self) -> impl Iterator<Item = &mut Instance> {
        self.cache.values_mut().chain(self.pending.iter_mut())
    }

    /// Saves pending children under the parent's current key value.
    pub(crate) async fn flush(&mut self, parent_key: Option<Bson>) -> MapperResult<()> {
        if let Some(parent_key) = parent_key {
            self.parent_key = parent_key;
        }
        if self.parent_key == Bson::Null {
            return Err(MapperError::InvalidDocument(format!(
                "parent of {} has no value for {}",
                self.field, self.key.parent_field
            )));
        }

        for child in self.pending.iter_mut() {
            child.set(&self.key.child_field, self.parent_key.clone())?;
        }
        tracing::debug!(
            collection = %self.collection(),
            count = self.pending.len(),
            "saving pushed linked documents"
        );
        try_join_all(self.pending.iter_mut().map(|child| child.save())).await?;
        self.pending.clear();
        Ok(())
    }
}

/// A query over the children of a linked array.
pub struct LinkedQuery<'a> {
    array: &'a mut LinkedArray,
    selector: Expr,
    skip: Option<usize>,
    limit: Option<usize>,
}

impl<'a> LinkedQuery<'a> {
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Runs the query.
    ///
    /// Without a selector the results are the children at positions `skip..`, and are
    /// cached there. Filtered results are held apart from the positional cache.
    pub async fn load(self) -> MapperResult<Vec<&'a Instance>> {
        let LinkedQuery {
            array,
            selector,
            skip,
            limit,
        } = self;

        let filtered = !selector.is_empty();
        let filter = if filtered {
            selector.and(array.selector())
        } else {
            array.selector()
        };
        let mut builder = Query::builder()
            .filter(filter)
            .sort("_id", SortDirection::Asc);
        if let Some(skip) = skip {
            builder = builder.offset(skip);
        }
        if let Some(limit) = limit {
            builder = builder.limit(limit);
        }
        let query = builder.build();

        let backend = array.connection.backend()?;
        tracing::debug!(collection = %array.collection(), ?query, "loading linked documents");
        let documents = backend.find(array.collection(), query).await?;

        let start = skip.unwrap_or(0);
        let loaded = documents.len();
        if !filtered {
            for (offset, document) in documents.into_iter().enumerate() {
                let child = array.materialize(document, Some(start + offset))?;
                array.cache.insert(start + offset, child);
            }

            let array: &'a LinkedArray = array;
            return Ok(array
                .cache
                .range(start..start + loaded)
                .map(|(_, child)| child)
                .collect());
        }

        // Children already cached by position are handed out as they are.
        let mut hits = Vec::with_capacity(loaded);
        array.found.clear();
        for document in documents {
            let id = document.get("_id").cloned().unwrap_or(Bson::Null);
            let cached = array
                .cache
                .iter()
                .find(|(_, child)| *child.id() == id)
                .map(|(position, _)| *position);
            match cached {
                Some(position) => hits.push(Hit::Cached(position)),
                None => {
                    let child = array.materialize(document, None)?;
                    array.found.push(child);
                    hits.push(Hit::Found(array.found.len() - 1));
                }
            }
        }

        let array: &'a LinkedArray = array;
        Ok(hits
            .into_iter()
            .filter_map(|hit| match hit {
                Hit::Cached(position) => array.cache.get(&position),
                Hit::Found(index) => array.found.get(index),
            })
            .collect())
    }
}

enum Hit {
    Cached(usize),
    Found(usize),
}
