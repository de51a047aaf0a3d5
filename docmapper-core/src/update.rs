//! Update compiler.
//!
//! Mutations are recorded at their final path when they happen, so compiling an update
//! only means choosing the selector for the instance's placement and sending the
//! accumulated statement as it is.

use bson::Bson;

use crate::{
    backend::StoreBackend,
    document::Placement,
    error::{MapperError, MapperResult},
    lifecycle::SharedLifecycle,
    query::{Expr, Filter},
};

/// Collection and selector an update of an instance is sent with.
#[derive(Debug, Clone)]
pub struct UpdateTarget {
    pub collection: String,
    pub selector: Expr,
}

/// Resolves the document a placed instance's update applies to.
///
/// Elements update their root document; detached embedded documents update their host
/// document, matched by host id and element id so the positional `$` resolves to them.
pub fn target(placement: &Placement, id: &Bson) -> MapperResult<UpdateTarget> {
    match placement {
        Placement::Root { collection } => Ok(UpdateTarget {
            collection: collection.clone(),
            selector: Filter::eq("_id", id.clone()),
        }),
        Placement::Detached {
            collection,
            host_id,
            array_field,
        } => Ok(UpdateTarget {
            collection: collection.clone(),
            selector: Filter::and([
                Filter::eq("_id", host_id.clone()),
                Filter::eq(format!("{}._id", array_field), id.clone()),
            ]),
        }),
        Placement::Element { root, root_id, .. } => target(root, root_id),
        Placement::Unattached => Err(MapperError::Precondition(
            "embedded document is not attached to a host document".to_string(),
        )),
    }
}

/// Sends the pending statements of `lifecycle` in order and clears them.
///
/// Usually there is one. Writes inside stored elements of an array that also has a
/// pending `$push` go out in a later request against the same selector.
///
/// # Errors
///
/// Returns [`MapperError::DocumentNotFound`] if a selector matched nothing; the
/// statements not yet applied are kept in that case.
pub(crate) async fn execute(
    backend: &dyn StoreBackend,
    placement: &Placement,
    id: &Bson,
    lifecycle: &SharedLifecycle,
) -> MapperResult<()> {
    let statements = lifecycle.statements();
    if statements.is_empty() {
        return Ok(());
    }

    let target = target(placement, id)?;
    for statement in statements {
        tracing::debug!(
            collection = %target.collection,
            selector = ?target.selector,
            update = %statement.to_document(),
            "updating document"
        );
        let matched = backend
            .update(&target.collection, &target.selector, &statement)
            .await?;
        if matched == 0 {
            return Err(MapperError::DocumentNotFound(
                display_id(id),
                target.collection,
            ));
        }
        lifecycle.advance();
    }

    lifecycle.mark_persisted();
    Ok(())
}

/// Renders an id for error messages.
pub(crate) fn display_id(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}
