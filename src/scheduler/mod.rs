//! Scheduler pools: the process pool drives every process's quanta over a
//! shared ready queue; the FFI and I/O pools service the side effects a
//! process's own dispatch loop has no Kernel access to perform.

pub mod ffi_pool;
pub mod io_pool;
pub mod process_pool;

pub use process_pool::ProcessPool;
