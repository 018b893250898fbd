//! User-space side of the core: the system call surface user code programs
//! against, the COW fault handler and `fork`/`sfork`.

pub mod fork;
pub mod pgfault;

use crate::arch::{Entry, EntryFlags, Page, UTrapframe};
use crate::env::{EnvId, EnvStatus};
use crate::error::SysResult;
use crate::mem::{VirtualAddress, PAGE_SIZE};
use core::fmt;
use pgfault::FaultError;

/// Result of `sys_exofork` as seen by the two sides of the fork point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExoFork {
    Parent(EnvId),
    Child,
}

/// Entry the kernel calls, on the exception stack, when the env page faults.
#[derive(Clone, Copy)]
pub struct PgfaultUpcall(pub fn(&mut dyn UserSpace, &UTrapframe) -> Result<(), FaultError>);

impl fmt::Debug for PgfaultUpcall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PgfaultUpcall({:p})", self.0 as *const ())
    }
}

pub trait Syscall {
    fn getenvid(&self) -> EnvId;
    fn exofork(&mut self) -> SysResult<ExoFork>;
    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> SysResult<()>;
    fn env_set_pgfault_upcall(&mut self, env: EnvId, upcall: PgfaultUpcall) -> SysResult<()>;
    fn env_set_priority(&mut self, env: EnvId, priority: u32) -> SysResult<()>;
    fn env_destroy(&mut self, env: EnvId) -> SysResult<()>;

    fn page_alloc(&mut self, env: EnvId, va: VirtualAddress, perm: EntryFlags) -> SysResult<()>;
    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: EntryFlags,
    ) -> SysResult<()>;
    fn page_unmap(&mut self, env: EnvId, va: VirtualAddress) -> SysResult<()>;
}

/// What a running env can see and touch of itself.
pub trait UserSpace: Syscall {
    /// Read-only self mapping of the page directory.
    fn vpd(&self, va: VirtualAddress) -> Option<EntryFlags>;
    /// Read-only self mapping of the page tables.
    fn vpt(&self, page: Page) -> Option<Entry>;

    fn read(&mut self, va: VirtualAddress, buf: &mut [u8]) -> SysResult<()>;
    fn write(&mut self, va: VirtualAddress, data: &[u8]) -> SysResult<()>;

    fn thisenv(&self) -> Option<EnvId>;
    fn set_thisenv(&mut self, env: EnvId);

    fn copy_page(&mut self, dst: VirtualAddress, src: VirtualAddress) -> SysResult<()> {
        let mut buf = [0u8; PAGE_SIZE as usize];
        self.read(src, &mut buf)?;
        self.write(dst, &buf)
    }

    /// Present and user accessible at both levels.
    fn is_user_mapped(&self, va: VirtualAddress) -> bool {
        self.vpd(va).is_some()
            && self
                .vpt(Page::containing_address(va))
                .map_or(false, |entry| entry.is_user_mapped())
    }
}
