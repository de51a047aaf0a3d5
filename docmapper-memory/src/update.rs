//! Applies partial-update statements to stored documents.
//!
//! Paths are dotted; numeric segments index into arrays. A `$` segment is the
//! positional operator: it stands for the first element of the array before it that
//! satisfies the equality constraints the selector places on that array.

use bson::{Bson, Document};

use docmapper_core::{
    error::{MapperError, MapperResult},
    lifecycle::UpdateStatement,
    query::Expr,
};

use crate::evaluator::{equals, lookup, resolve};

/// Applies `update` to `document`, which was matched by `selector`.
///
/// The document is left untouched when any instruction fails. Like the document store,
/// a statement writing a path and a path inside it is refused as a whole.
pub(crate) fn apply(document: &mut Document, update: &UpdateStatement, selector: &Expr) -> MapperResult<()> {
    if let Some((path, other)) = update.conflict() {
        return Err(MapperError::Backend(format!(
            "updating the path {} would create a conflict at {}",
            path, other
        )));
    }

    let mut updated = document.clone();

    for (path, value) in update.sets() {
        let path = positional(&updated, path, selector)?;
        *entry(&mut updated, &path)? = value.clone();
    }

    for (path, values) in update.pushes() {
        let path = positional(&updated, path, selector)?;
        let values = match values {
            Bson::Array(values) => values.clone(),
            other => vec![other.clone()],
        };
        let slot = entry(&mut updated, &path)?;
        match slot {
            Bson::Null => *slot = Bson::Array(values),
            Bson::Array(existing) => existing.extend(values),
            _ => {
                return Err(MapperError::InvalidDocument(format!(
                    "cannot push onto non-array field {}",
                    path
                )));
            }
        }
    }

    for (path, delta) in update.increments() {
        let path = positional(&updated, path, selector)?;
        let slot = entry(&mut updated, &path)?;
        *slot = increment(slot, delta).ok_or_else(|| {
            MapperError::InvalidDocument(format!("cannot increment non-numeric field {}", path))
        })?;
    }

    *document = updated;
    Ok(())
}

/// Replaces the `$` segment of `path` with the index of the element it designates.
fn positional(document: &Document, path: &str, selector: &Expr) -> MapperResult<String> {
    let Some(position) = path.split('.').position(|segment| segment == "$") else {
        return Ok(path.to_string());
    };

    let segments: Vec<&str> = path.split('.').collect();
    let array_path = segments[..position].join(".");
    let Some(Bson::Array(elements)) = lookup(document, &array_path) else {
        return Err(MapperError::InvalidDocument(format!(
            "positional update of {} needs an array at {}",
            path, array_path
        )));
    };

    let constraints = selector.equalities_under(&array_path);
    let index = elements
        .iter()
        .position(|element| match element {
            Bson::Document(element) => constraints.iter().all(|(field, value)| {
                resolve(element, field)
                    .into_iter()
                    .any(|candidate| equals(candidate, value))
            }),
            _ => false,
        })
        .ok_or_else(|| {
            MapperError::InvalidDocument(format!(
                "no element of {} matches the positional update of {}",
                array_path, path
            ))
        })?;

    let mut resolved: Vec<String> = segments.iter().map(|segment| segment.to_string()).collect();
    resolved[position] = index.to_string();
    Ok(resolved.join("."))
}

/// The value at `path`, creating missing documents on the way and a `Null` leaf.
fn entry<'a>(document: &'a mut Document, path: &str) -> MapperResult<&'a mut Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((head, rest)) = segments.split_first() else {
        return Err(MapperError::InvalidDocument("empty update path".to_string()));
    };

    if !document.contains_key(*head) {
        document.insert(*head, Bson::Null);
    }
    let root = document
        .get_mut(*head)
        .ok_or_else(|| MapperError::InvalidDocument(format!("cannot write {}", path)))?;
    descend(root, rest, path)
}

fn descend<'a>(value: &'a mut Bson, segments: &[&str], path: &str) -> MapperResult<&'a mut Bson> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(value);
    };

    if matches!(value, Bson::Null) {
        *value = Bson::Document(Document::new());
    }
    let child = match value {
        Bson::Document(inner) => {
            if !inner.contains_key(*head) {
                inner.insert(*head, Bson::Null);
            }
            inner
                .get_mut(*head)
                .ok_or_else(|| MapperError::InvalidDocument(format!("cannot write {}", path)))?
        }
        Bson::Array(elements) => {
            let index = head.parse::<usize>().map_err(|_| {
                MapperError::InvalidDocument(format!("{} indexes an array with {}", path, head))
            })?;
            if elements.len() <= index {
                elements.resize(index + 1, Bson::Null);
            }
            &mut elements[index]
        }
        _ => {
            return Err(MapperError::InvalidDocument(format!(
                "cannot traverse scalar at {} of {}",
                head, path
            )));
        }
    };
    descend(child, rest, path)
}

fn increment(current: &Bson, delta: &Bson) -> Option<Bson> {
    match (current, delta) {
        (Bson::Null, delta) if is_number(delta) => Some(delta.clone()),
        (Bson::Int32(a), Bson::Int32(b)) => Some(
            a.checked_add(*b)
                .map(Bson::Int32)
                .unwrap_or(Bson::Int64(*a as i64 + *b as i64)),
        ),
        (Bson::Int32(a), Bson::Int64(b)) => Some(Bson::Int64(*a as i64 + b)),
        (Bson::Int64(a), Bson::Int32(b)) => Some(Bson::Int64(a + *b as i64)),
        (Bson::Int64(a), Bson::Int64(b)) => Some(Bson::Int64(a + b)),
        (a, b) if is_number(a) && is_number(b) => Some(Bson::Double(as_f64(a)? + as_f64(b)?)),
        _ => None,
    }
}

fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}
