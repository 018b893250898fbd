pub mod paging;
pub mod trap;

pub use paging::{AddressSpace, Entry, EntryFlags, Page, PagingError};
pub use trap::{FaultCause, PushRegs, Trapframe, UTrapframe};
