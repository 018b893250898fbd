use super::Kernel;
use crate::arch::{Entry, EntryFlags, FaultCause, Page, UTrapframe};
use crate::env::{EnvId, EnvStatus};
use crate::error::{SysError, SysResult};
use crate::mem::memlayout::{UTOP, UXSTACK};
use crate::mem::{frame::Frame, VirtualAddress, PAGE_SIZE};
use crate::user::{ExoFork, PgfaultUpcall, Syscall, UserSpace};
use log::{error, warn};

// An env's view of the machine while it runs: its own mappings, its own
// memory and the system calls. Holding one means holding the kernel.
pub struct UserEnv<'k> {
    kernel: &'k mut Kernel,
    id: EnvId,
    thisenv: Option<EnvId>,
}

impl<'k> UserEnv<'k> {
    pub(super) fn new(kernel: &'k mut Kernel, id: EnvId) -> Self {
        Self {
            kernel,
            id,
            thisenv: Some(id),
        }
    }

    fn alive(&self) -> SysResult<()> {
        match self.kernel.envs.get(self.id) {
            Some(env) if env.status != EnvStatus::Dying => Ok(()),
            _ => Err(SysError::BadEnv),
        }
    }

    // Frame behind `va` if the access is allowed, the fault it raises otherwise.
    fn translate(&self, va: VirtualAddress, write: bool) -> SysResult<Result<Frame, FaultCause>> {
        self.alive()?;
        let mut cause = FaultCause::USER;
        if write {
            cause |= FaultCause::WRITE;
        }
        if va >= UTOP {
            return Ok(Err(cause));
        }
        let entry = self.vpt(Page::containing_address(va));
        match entry {
            Some(entry) if entry.is_user_mapped() => {
                if write && !entry.flags().contains(EntryFlags::WRITABLE) {
                    Ok(Err(cause | FaultCause::PROTECTION))
                } else {
                    Ok(Ok(entry.frame()))
                }
            }
            _ => Ok(Err(cause)),
        }
    }

    // Resolves the frame for one access, running the fault upcall once if
    // the first attempt faults.
    fn access(&mut self, va: VirtualAddress, write: bool) -> SysResult<Frame> {
        match self.translate(va, write)? {
            Ok(frame) => return Ok(frame),
            Err(cause) => self.page_fault(va, cause)?,
        }
        match self.translate(va, write)? {
            Ok(frame) => Ok(frame),
            Err(cause) => {
                self.user_fault(va, cause, "fault not resolved by upcall");
                Err(SysError::Fault)
            }
        }
    }

    fn user_fault(&mut self, va: VirtualAddress, cause: FaultCause, why: &str) {
        let eip = self.kernel.envs.get(self.id).map_or(0, |env| env.tf.eip);
        error!(
            "[{}] user fault va {:#010x} ip {:#010x} ({:?}): {}",
            self.id, va, eip, cause, why
        );
        self.destroy();
    }

    fn destroy(&mut self) {
        if let Err(err) = self.kernel.env_destroy(self.id) {
            warn!("[{}] destroying after fault: {}", self.id, err);
        }
    }

    // Delivers a page fault to the env's upcall on the exception stack.
    fn page_fault(&mut self, va: VirtualAddress, cause: FaultCause) -> SysResult<()> {
        let (upcall, depth, tf) = match self.kernel.envs.get(self.id) {
            Some(env) => (env.pgfault_upcall, env.upcall_depth, env.tf),
            None => return Err(SysError::BadEnv),
        };
        let Some(PgfaultUpcall(upcall)) = upcall else {
            self.user_fault(va, cause, "no page fault upcall");
            return Err(SysError::Fault);
        };
        let xstack_ok = self.vpt(Page::containing_address(UXSTACK)).map_or(false, |entry| {
            entry.is_user_mapped() && entry.flags().contains(EntryFlags::WRITABLE)
        });
        if !xstack_ok {
            self.user_fault(va, cause, "exception stack not mapped");
            return Err(SysError::Fault);
        }
        if (depth + 1) * UTrapframe::STACK_FOOTPRINT > PAGE_SIZE {
            self.user_fault(va, cause, "exception stack overflow");
            return Err(SysError::Fault);
        }

        let utf = UTrapframe::new(&tf, va, cause);
        self.set_upcall_depth(depth + 1);
        let handled = upcall(self, &utf);
        self.set_upcall_depth(depth);

        if let Err(err) = handled {
            // the handler gave up, which ends the env
            error!("[{}] user panic: {}", self.id, err);
            self.destroy();
            return Err(SysError::Fault);
        }
        self.alive().map_err(|_| SysError::Fault)
    }

    fn set_upcall_depth(&mut self, depth: u32) {
        if let Some(env) = self.kernel.envs.get_mut(self.id) {
            env.upcall_depth = depth;
        }
    }

    // Byte runs of `len` bytes starting at `va`, split at page boundaries.
    fn chunks(
        va: VirtualAddress,
        len: usize,
    ) -> impl Iterator<Item = (VirtualAddress, usize, usize)> {
        let mut done = 0usize;
        core::iter::from_fn(move || {
            if done >= len {
                return None;
            }
            let at = va.offset(done as u32);
            let n = core::cmp::min(len - done, (PAGE_SIZE - at.page_offset()) as usize);
            let chunk = (at, done, n);
            done += n;
            Some(chunk)
        })
    }
}

impl Syscall for UserEnv<'_> {
    fn getenvid(&self) -> EnvId {
        self.kernel.sys_getenvid(self.id)
    }

    fn exofork(&mut self) -> SysResult<ExoFork> {
        self.kernel.sys_exofork(self.id).map(ExoFork::Parent)
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> SysResult<()> {
        self.kernel.sys_env_set_status(self.id, env, status)
    }

    fn env_set_pgfault_upcall(&mut self, env: EnvId, upcall: PgfaultUpcall) -> SysResult<()> {
        self.kernel.sys_env_set_pgfault_upcall(self.id, env, upcall)
    }

    fn env_set_priority(&mut self, env: EnvId, priority: u32) -> SysResult<()> {
        self.kernel.sys_env_set_priority(self.id, env, priority)
    }

    fn env_destroy(&mut self, env: EnvId) -> SysResult<()> {
        self.kernel.sys_env_destroy(self.id, env)
    }

    fn page_alloc(&mut self, env: EnvId, va: VirtualAddress, perm: EntryFlags) -> SysResult<()> {
        self.kernel.sys_page_alloc(self.id, env, va, perm)
    }

    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtualAddress,
        dst_env: EnvId,
        dst_va: VirtualAddress,
        perm: EntryFlags,
    ) -> SysResult<()> {
        self.kernel.sys_page_map(self.id, src_env, src_va, dst_env, dst_va, perm)
    }

    fn page_unmap(&mut self, env: EnvId, va: VirtualAddress) -> SysResult<()> {
        self.kernel.sys_page_unmap(self.id, env, va)
    }
}

impl UserSpace for UserEnv<'_> {
    fn vpd(&self, va: VirtualAddress) -> Option<EntryFlags> {
        self.kernel.envs.get(self.id)?.address_space.pde(va)
    }

    fn vpt(&self, page: Page) -> Option<Entry> {
        self.kernel.envs.get(self.id)?.address_space.get(page)
    }

    fn read(&mut self, va: VirtualAddress, buf: &mut [u8]) -> SysResult<()> {
        for (at, done, n) in Self::chunks(va, buf.len()) {
            let frame = self.access(at, false)?;
            let page = self.kernel.frames.contents(frame).ok_or(SysError::Fault)?;
            let offset = at.page_offset() as usize;
            buf[done..done + n].copy_from_slice(&page[offset..offset + n]);
        }
        Ok(())
    }

    fn write(&mut self, va: VirtualAddress, data: &[u8]) -> SysResult<()> {
        for (at, done, n) in Self::chunks(va, data.len()) {
            let frame = self.access(at, true)?;
            let page = self
                .kernel
                .frames
                .contents_mut(frame)
                .ok_or(SysError::Fault)?;
            let offset = at.page_offset() as usize;
            page[offset..offset + n].copy_from_slice(&data[done..done + n]);
        }
        Ok(())
    }

    fn thisenv(&self) -> Option<EnvId> {
        self.thisenv
    }

    fn set_thisenv(&mut self, env: EnvId) {
        self.thisenv = Some(env);
    }
}
