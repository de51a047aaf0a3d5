//! Per-instance mutation tracking.
//!
//! A [`Lifecycle`] records whether a top-level document has ever been persisted and the
//! partial-update instructions implied by every field mutation since the last persist.
//! It is shared by reference ([`SharedLifecycle`]) with every embedded descendant, so a
//! change deep inside an embedded array and a change at the top level land in the same
//! [`UpdateStatement`].

use bson::{Bson, Document, doc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

/// Accumulated partial-update instructions, keyed by dotted path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateStatement {
    set: Document,
    push: Document,
    inc: Document,
}

impl UpdateStatement {
    /// Creates an empty statement.
    pub fn new() -> Self {
        UpdateStatement::default()
    }

    /// Adds a `$set` of `path` to `value`, replacing any earlier set of the same path.
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.record_set(path, value);
        self
    }

    /// Adds a `$push` of `value` onto the array at `path`.
    pub fn push(mut self, path: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.record_push(path, value);
        self
    }

    /// Adds an `$inc` of `delta` to the number at `path`.
    pub fn inc(mut self, path: impl Into<String>, delta: impl Into<Bson>) -> Self {
        self.inc.insert(path.into(), delta.into());
        self
    }

    pub(crate) fn record_set(&mut self, path: impl Into<String>, value: impl Into<Bson>) {
        self.set.insert(path.into(), value.into());
    }

    pub(crate) fn record_push(&mut self, path: impl Into<String>, value: impl Into<Bson>) {
        let path = path.into();
        let value = value.into();
        match self.push.get_mut(&path) {
            Some(Bson::Array(values)) => values.push(value),
            _ => {
                self.push.insert(path, Bson::Array(vec![value]));
            }
        }
    }

    pub(crate) fn pushed_mut(&mut self, path: &str) -> Option<&mut Vec<Bson>> {
        match self.push.get_mut(path) {
            Some(Bson::Array(values)) => Some(values),
            _ => None,
        }
    }

    /// Removes and returns every instruction whose path lies inside `path`.
    pub(crate) fn take_inside(&mut self, path: &str) -> UpdateStatement {
        fn split(source: &mut Document, path: &str) -> Document {
            let inside: Vec<String> = source
                .keys()
                .filter(|key| is_inside(key, path))
                .cloned()
                .collect();
            let mut taken = Document::new();
            for key in inside {
                if let Some(value) = source.remove(&key) {
                    taken.insert(key, value);
                }
            }
            taken
        }

        UpdateStatement {
            set: split(&mut self.set, path),
            push: split(&mut self.push, path),
            inc: split(&mut self.inc, path),
        }
    }

    /// First pair of paths that touch the same field, one equal to or inside the other.
    ///
    /// The document store refuses such a statement as a whole.
    pub fn conflict(&self) -> Option<(String, String)> {
        let paths: Vec<&String> = self
            .set
            .keys()
            .chain(self.push.keys())
            .chain(self.inc.keys())
            .collect();
        for (i, a) in paths.iter().enumerate() {
            for b in &paths[i + 1..] {
                if a == b || is_inside(a, b) || is_inside(b, a) {
                    return Some((a.to_string(), b.to_string()));
                }
            }
        }
        None
    }

    /// Path to value pairs of the pending `$set`.
    pub fn sets(&self) -> &Document {
        &self.set
    }

    /// Path to element-array pairs of the pending `$push`.
    pub fn pushes(&self) -> &Document {
        &self.push
    }

    /// Path to delta pairs of the pending `$inc`.
    pub fn increments(&self) -> &Document {
        &self.inc
    }

    /// Returns `true` when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.push.is_empty() && self.inc.is_empty()
    }

    pub fn clear(&mut self) {
        self.set.clear();
        self.push.clear();
        self.inc.clear();
    }

    /// Renders the statement in document-store operator form.
    ///
    /// Pushes are always rendered with `$each` so several elements appended to the
    /// same array between persists go out in one instruction.
    pub fn to_document(&self) -> Document {
        let mut update = Document::new();
        if !self.set.is_empty() {
            update.insert("$set", self.set.clone());
        }
        if !self.push.is_empty() {
            let mut push = Document::new();
            for (path, values) in &self.push {
                push.insert(path.clone(), doc! { "$each": values.clone() });
            }
            update.insert("$push", push);
        }
        if !self.inc.is_empty() {
            update.insert("$inc", self.inc.clone());
        }
        update
    }
}

/// Instructions that cannot share one request with the stage before them.
///
/// The document store rejects an update touching an array path and a path inside that
/// array at once. While a `$push` onto an array is pending, a write inside one of the
/// pushed elements is folded into the pushed document, and a write inside one of the
/// array's stored elements is recorded into the next stage, which is sent after this one.
#[derive(Debug, Clone, Default)]
pub struct PendingStage {
    statement: UpdateStatement,
    /// Array path to the index the first pending pushed element lands at.
    pushed_from: HashMap<String, usize>,
    next: Option<Box<PendingStage>>,
}

impl PendingStage {
    fn is_empty(&self) -> bool {
        self.statement.is_empty() && self.next.as_ref().is_none_or(|next| next.is_empty())
    }

    fn next_mut(&mut self) -> &mut PendingStage {
        self.next.get_or_insert_with(Box::default)
    }

    /// Pending push whose array holds `path`: the array path, its first pushed index,
    /// the element index `path` designates and the remainder inside that element.
    fn inside_push<'p>(&self, path: &'p str) -> Option<(String, usize, Option<usize>, &'p str)> {
        self.pushed_from.iter().find_map(|(array, start)| {
            let inner = path.strip_prefix(array.as_str())?.strip_prefix('.')?;
            let (index, rest) = inner.split_once('.').unwrap_or((inner, ""));
            Some((array.clone(), *start, index.parse().ok(), rest))
        })
    }

    fn pushed_element(&mut self, array: &str, start: usize, index: Option<usize>) -> Option<&mut Bson> {
        let offset = index?.checked_sub(start)?;
        self.statement.pushed_mut(array)?.get_mut(offset)
    }

    fn record_set(&mut self, path: String, value: Bson) {
        if let Some((array, start, index, rest)) = self.inside_push(&path) {
            let folded = match self.pushed_element(&array, start, index) {
                Some(element) => write_within(element, rest, value.clone(), false),
                None => false,
            };
            if !folded {
                self.next_mut().record_set(path, value);
            }
            return;
        }
        self.statement.record_set(path, value);
    }

    fn record_push(&mut self, path: String, index: usize, value: Bson) {
        if let Some((array, start, element, rest)) = self.inside_push(&path) {
            let folded = match self.pushed_element(&array, start, element) {
                Some(element) => write_within(element, rest, value.clone(), true),
                None => false,
            };
            if !folded {
                self.next_mut().record_push(path, index, value);
            }
            return;
        }

        let displaced = self.statement.take_inside(&path);
        if !displaced.is_empty() {
            let starts: Vec<(String, usize)> = self
                .pushed_from
                .iter()
                .filter(|(array, _)| is_inside(array, &path))
                .map(|(array, start)| (array.clone(), *start))
                .collect();
            for (array, _) in &starts {
                self.pushed_from.remove(array);
            }
            self.next_mut().absorb(displaced, &starts);
        }

        self.statement.record_push(path.clone(), value);
        self.pushed_from.entry(path).or_insert(index);
    }

    fn absorb(&mut self, statement: UpdateStatement, starts: &[(String, usize)]) {
        for (path, value) in statement.set {
            self.record_set(path, value);
        }
        for (path, values) in statement.push {
            let start = starts
                .iter()
                .find(|(array, _)| *array == path)
                .map(|(_, start)| *start)
                .unwrap_or_default();
            let values = match values {
                Bson::Array(values) => values,
                other => vec![other],
            };
            for (offset, value) in values.into_iter().enumerate() {
                self.record_push(path.clone(), start + offset, value);
            }
        }
        for (path, delta) in statement.inc {
            self.statement.inc.insert(path, delta);
        }
    }

    fn statements(&self) -> Vec<UpdateStatement> {
        let mut statements = Vec::new();
        let mut stage = Some(self);
        while let Some(current) = stage {
            if !current.statement.is_empty() {
                statements.push(current.statement.clone());
            }
            stage = current.next.as_deref();
        }
        statements
    }
}

/// Returns `true` if `path` lies strictly inside `parent`.
fn is_inside(path: &str, parent: &str) -> bool {
    path.strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Writes `value` at the dotted `path` within `target`, or appends it to the array there
/// when `append` is set. Returns `false` if the path does not lead anywhere writable.
fn write_within(target: &mut Bson, path: &str, value: Bson, append: bool) -> bool {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    if head.is_empty() {
        return false;
    }

    match (target, rest) {
        (Bson::Document(document), None) => {
            if append {
                match document.get_mut(head) {
                    Some(Bson::Array(values)) => values.push(value),
                    Some(Bson::Null) | None => {
                        document.insert(head, Bson::Array(vec![value]));
                    }
                    Some(_) => return false,
                }
            } else {
                document.insert(head, value);
            }
            true
        }
        (Bson::Document(document), Some(rest)) => match document.get_mut(head) {
            Some(child) => write_within(child, rest, value, append),
            None => false,
        },
        (Bson::Array(values), rest) => {
            let Some(child) = head.parse::<usize>().ok().and_then(|index| values.get_mut(index)) else {
                return false;
            };
            match rest {
                Some(rest) => write_within(child, rest, value, append),
                None if append => match child {
                    Bson::Array(inner) => {
                        inner.push(value);
                        true
                    }
                    _ => false,
                },
                None => {
                    *child = value;
                    true
                }
            }
        }
        _ => false,
    }
}

/// Persist state of one top-level document.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    /// `true` until the first successful insert.
    pub is_new: bool,
    /// Instructions recorded since the last persist, in send order.
    pub pending: PendingStage,
}

/// Lifecycle shared between a top-level instance and its embedded descendants.
#[derive(Debug, Clone)]
pub struct SharedLifecycle(Arc<Mutex<Lifecycle>>);

impl SharedLifecycle {
    pub fn new(is_new: bool) -> Self {
        SharedLifecycle(Arc::new(Mutex::new(Lifecycle {
            is_new,
            pending: PendingStage::default(),
        })))
    }

    /// Locks the lifecycle. A poisoned lock still yields the state: a panic while
    /// recording cannot leave a statement half-written.
    pub fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_new(&self) -> bool {
        self.lock().is_new
    }

    /// Returns `true` when both handles point at the same lifecycle.
    pub fn same_as(&self, other: &SharedLifecycle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Takes a copy of the statement the next update request sends.
    pub fn statement(&self) -> UpdateStatement {
        self.lock().pending.statement.clone()
    }

    /// Every pending statement, in the order they have to be sent.
    pub fn statements(&self) -> Vec<UpdateStatement> {
        self.lock().pending.statements()
    }

    /// Returns `true` when nothing is pending.
    pub fn is_clean(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Records a `$set`, unless the document has never been persisted.
    pub fn record_set(&self, path: &str, value: Bson) {
        let mut state = self.lock();
        if state.is_new {
            return;
        }
        tracing::trace!(path, "recording $set");
        state.pending.record_set(path.to_string(), value);
    }

    /// Records a `$push` of the element that lands at `index` of the array at `path`,
    /// unless the document has never been persisted.
    pub fn record_push(&self, path: &str, index: usize, value: Bson) {
        let mut state = self.lock();
        if state.is_new {
            return;
        }
        tracing::trace!(path, index, "recording $push");
        state.pending.record_push(path.to_string(), index, value);
    }

    /// Drops the first pending statement once it has been sent.
    pub fn advance(&self) {
        let mut state = self.lock();
        let next = state.pending.next.take().map(|next| *next).unwrap_or_default();
        state.pending = next;
    }

    /// Marks the document persisted and empties the statement.
    pub fn mark_persisted(&self) {
        let mut state = self.lock();
        state.is_new = false;
        state.pending = PendingStage::default();
    }

    /// Discards whatever is pending, for a document that no longer exists.
    pub fn discard(&self) {
        self.lock().pending = PendingStage::default();
    }
}
