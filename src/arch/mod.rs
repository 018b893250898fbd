pub mod i386;

pub use i386::{
    AddressSpace, Entry, EntryFlags, FaultCause, Page, PagingError, PushRegs, Trapframe,
    UTrapframe,
};
