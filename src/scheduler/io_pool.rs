//! Services `io_submit` requests.
//!
//! Like [`super::ffi_pool`], nothing in the fixed instruction set currently
//! emits [`crate::process::StepRequest::IoSubmit`]. This pool still exists
//! as a real (if minimal) implementation of the named component: this
//! runtime has no actual file-descriptor driver underneath it, so every
//! interaction is granted and completed immediately rather than queued
//! against a real readiness notifier.

use std::sync::Arc;

use crate::kernel::Kernel;
use crate::value::io::{InteractionKind, InteractionStatus, IoRequestValue};

/// Complete an I/O interaction synchronously.
pub fn submit(kernel: &Arc<Kernel>, kind: InteractionKind, descriptor: Option<u64>, buffer: Vec<u8>) {
    let id = kernel.interaction_ids().emit();
    let mut request = IoRequestValue::new(id, kind, descriptor, buffer);
    request.mark_in_flight();
    request.complete(InteractionStatus::Success);
}
