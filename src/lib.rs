//! Copy-on-write `fork` driven by a user-level page fault handler, and a
//! priority scheduler with round-robin tie-breaking, over a small model of
//! an exokernel-style kernel: i386 two-level page tables, a fixed table of
//! environments and a refcounted physical page pool.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate alloc;

pub mod arch;
pub mod config;
pub mod env;
pub mod error;
pub mod kern;
pub mod locks;
pub mod logging;
pub mod mem;
pub mod user;

pub use config::KernelConfig;
pub use env::{EnvId, EnvStatus, EnvType};
pub use error::{SysError, SysResult};
pub use kern::{sched::SchedError, Kernel, UserEnv};
pub use user::fork::{fork, sfork, ForkError, ForkResult};
