//! The fixed C entry points the engine calls, one per listener kind.
//!
//! Each trampoline decodes its raw arguments, routes the event through
//! [`super::dispatch`], and never lets a panic unwind into the engine.

use super::{dispatch, Dispatcher};
use crate::error::Result;
use crate::native::{
    NativeArray, NativeDocument, NativeReplicatedDocument, NativeReplicatorStatus,
};
use crate::types::{
    ConflictResolution, DocumentFlags, ExecutionContext, ListenerKind, ReplicatedDocument,
    ReplicatorStatus,
};
use std::ffi::{c_char, c_uint, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

/// Run `body`, turning a panic into `fallback()`.
fn guarded<R>(kind: ListenerKind, body: impl FnOnce() -> R, fallback: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(kind = %kind, "panic while dispatching; engine given the default");
            fallback()
        }
    }
}

/// # Safety
/// `ptr` must be null or a NUL-terminated string valid for the call.
unsafe fn c_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

/// # Safety
/// `ids` must point to `count` strings valid for the call.
unsafe fn c_str_array(count: c_uint, ids: *const *const c_char) -> Vec<String> {
    if ids.is_null() || count == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(ids, count as usize)
        .iter()
        .map(|id| c_str(*id))
        .collect()
}

pub extern "C" fn database_change_trampoline(
    context: *mut c_void,
    num_docs: c_uint,
    doc_ids: *const *const c_char,
) {
    let kind = ListenerKind::DatabaseChange;
    guarded(
        kind,
        || {
            // SAFETY: the engine passes `num_docs` valid ids.
            let ids = unsafe { c_str_array(num_docs, doc_ids) };
            dispatch(context, kind, |d, ctx, token| {
                Ok(d.registries().database_change.get(token).map(|cb| cb(ctx, &ids)))
            });
        },
        || (),
    )
}

pub extern "C" fn document_change_trampoline(context: *mut c_void, doc_id: *const c_char) {
    let kind = ListenerKind::DocumentChange;
    guarded(
        kind,
        || {
            // SAFETY: the engine passes a valid id.
            let id = unsafe { c_str(doc_id) };
            dispatch(context, kind, |d, ctx, token| {
                Ok(d.registries().document_change.get(token).map(|cb| cb(ctx, &id)))
            });
        },
        || (),
    )
}

pub extern "C" fn query_change_trampoline(context: *mut c_void, rows: *const NativeArray) {
    let kind = ListenerKind::QueryChange;
    guarded(
        kind,
        || {
            dispatch(context, kind, |d, ctx, token| {
                let Some(callback) = d.registries().query_change.get(token) else {
                    return Ok(None);
                };
                // SAFETY: the engine keeps the rows alive for the call.
                let rows = match unsafe { rows.as_ref() } {
                    Some(rows) => d.reader().read_array(rows)?,
                    None => Vec::new(),
                };
                callback(ctx, &rows);
                Ok(Some(()))
            });
        },
        || (),
    )
}

pub extern "C" fn notification_ready_trampoline(context: *mut c_void) {
    let kind = ListenerKind::NotificationReady;
    guarded(
        kind,
        || {
            dispatch(context, kind, |d, ctx, token| {
                Ok(d.registries().notification_ready.get(token).map(|cb| cb(ctx)))
            });
        },
        || (),
    )
}

fn filter(
    kind: ListenerKind,
    context: *mut c_void,
    doc: *const NativeDocument,
    is_deleted: bool,
) -> bool {
    guarded(
        kind,
        || {
            dispatch(context, kind, |d, ctx, token| {
                let registry = match kind {
                    ListenerKind::PushFilter => &d.registries().push_filter,
                    _ => &d.registries().pull_filter,
                };
                let Some(callback) = registry.get(token) else {
                    return Ok(None);
                };
                // SAFETY: the engine keeps the document alive for the call.
                let Some(doc) = (unsafe { NativeDocument::borrow_raw(doc) }) else {
                    return Ok(Some(true));
                };
                let doc = d.read_document(doc)?;
                Ok(Some(callback(ctx, &doc, is_deleted)))
            })
            .unwrap_or(true)
        },
        || true,
    )
}

pub extern "C" fn push_filter_trampoline(
    context: *mut c_void,
    doc: *const NativeDocument,
    is_deleted: bool,
) -> bool {
    filter(ListenerKind::PushFilter, context, doc, is_deleted)
}

pub extern "C" fn pull_filter_trampoline(
    context: *mut c_void,
    doc: *const NativeDocument,
    is_deleted: bool,
) -> bool {
    filter(ListenerKind::PullFilter, context, doc, is_deleted)
}

pub extern "C" fn replicator_change_trampoline(
    context: *mut c_void,
    status: *const NativeReplicatorStatus,
) {
    let kind = ListenerKind::ReplicatorChange;
    guarded(
        kind,
        || {
            // SAFETY: the engine keeps the status alive for the call.
            let Some(status) = (unsafe { status.as_ref() }).map(ReplicatorStatus::from) else {
                tracing::warn!(kind = %kind, "replicator status missing; event dropped");
                return;
            };
            dispatch(context, kind, |d, ctx, token| {
                Ok(d.registries().replicator_change.get(token).map(|cb| cb(ctx, &status)))
            });
        },
        || (),
    )
}

/// # Safety
/// `docs` must point to `count` documents valid for the call.
unsafe fn replicated_documents(
    count: c_uint,
    docs: *const NativeReplicatedDocument,
) -> Vec<ReplicatedDocument> {
    if docs.is_null() || count == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(docs, count as usize)
        .iter()
        .map(|doc| ReplicatedDocument {
            id: c_str(doc.id),
            flags: DocumentFlags(doc.flags),
            error: (!doc.error.is_ok()).then_some(doc.error),
        })
        .collect()
}

pub extern "C" fn replicated_document_trampoline(
    context: *mut c_void,
    is_push: bool,
    num_docs: c_uint,
    docs: *const NativeReplicatedDocument,
) {
    let kind = ListenerKind::ReplicatedDocument;
    guarded(
        kind,
        || {
            // SAFETY: the engine passes `num_docs` valid entries.
            let docs = unsafe { replicated_documents(num_docs, docs) };
            dispatch(context, kind, |d, ctx, token| {
                Ok(d
                    .registries()
                    .replicated_document
                    .get(token)
                    .map(|cb| cb(ctx, is_push, &docs)))
            });
        },
        || (),
    )
}

/// Hand `doc` back to the engine as a new reference.
fn retained(doc: Option<&NativeDocument>) -> *const NativeDocument {
    match doc {
        // SAFETY: the engine passes documents it holds behind an `Arc`.
        Some(doc) => unsafe { NativeDocument::retain_raw(doc as *const NativeDocument) },
        None => ptr::null(),
    }
}

fn resolve(
    dispatcher: &Dispatcher,
    resolver: &super::ConflictResolverCallback,
    ctx: &ExecutionContext,
    doc_id: &str,
    local: Option<&NativeDocument>,
    remote: Option<&NativeDocument>,
) -> Result<*const NativeDocument> {
    let local_doc = local.map(|doc| dispatcher.read_document(doc)).transpose()?;
    let remote_doc = remote.map(|doc| dispatcher.read_document(doc)).transpose()?;

    Ok(match resolver(ctx, doc_id, local_doc.as_ref(), remote_doc.as_ref()) {
        ConflictResolution::Local => retained(local),
        ConflictResolution::Remote => retained(remote),
        ConflictResolution::Merged(properties) => {
            let dict = dispatcher.writer().write_dict(&properties)?.into_dict();
            let sequence = local.map_or(0, NativeDocument::sequence);
            NativeDocument::into_raw(Arc::new(NativeDocument::new(doc_id, sequence, dict)))
        }
        ConflictResolution::Delete => ptr::null(),
    })
}

/// Returns a +1 reference to the winning revision, or null to delete.
///
/// Without a usable resolver the local revision is returned, so a missing
/// or failing resolver never deletes a document.
pub extern "C" fn conflict_resolver_trampoline(
    context: *mut c_void,
    doc_id: *const c_char,
    local: *const NativeDocument,
    remote: *const NativeDocument,
) -> *const NativeDocument {
    let kind = ListenerKind::ConflictResolver;
    // SAFETY: the engine keeps both revisions alive for the call.
    let (local, remote) = unsafe {
        (
            NativeDocument::borrow_raw(local),
            NativeDocument::borrow_raw(remote),
        )
    };
    guarded(
        kind,
        || {
            // SAFETY: the engine passes a valid id.
            let id = unsafe { c_str(doc_id) };
            let outcome = dispatch(context, kind, |d, ctx, token| {
                let Some(resolver) = d.registries().conflict_resolver.get(token) else {
                    return Ok(None);
                };
                Ok(Some(resolve(d, &resolver, ctx, &id, local, remote)))
            });
            match outcome {
                Some(Ok(resolved)) => resolved,
                Some(Err(error)) => {
                    tracing::error!(kind = %kind, doc_id = %id, %error, "conflict resolution failed; keeping local revision");
                    retained(local)
                }
                None => retained(local),
            }
        },
        || retained(local),
    )
}
