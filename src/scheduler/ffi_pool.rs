//! Services `foreign_call` requests against functions resolved by
//! [`crate::kernel::Kernel::import_native_module`].
//!
//! No mnemonic in the fixed instruction set currently emits
//! [`crate::process::StepRequest::ForeignCall`] (there is no call-a-
//! foreign-function opcode), so this pool has no reachable caller in this
//! runtime today. It is kept as a real, working implementation of the
//! named component rather than a stub, ready for the day a `foreign`
//! opcode is added to the table.

use crate::loader::ForeignFunction;

/// Invoke a previously resolved foreign function.
///
/// # Safety
/// `function` must honor the zero-argument `extern "C"` calling
/// convention [`ForeignFunction`] promises; this is only guaranteed for
/// pointers obtained through [`crate::loader::resolve_native_module`].
pub unsafe fn invoke(function: ForeignFunction) {
    function();
}
