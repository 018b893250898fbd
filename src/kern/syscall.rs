// Kernel side of the system calls. `caller` is the env making the call.

use super::Kernel;
use crate::arch::{EntryFlags, Page};
use crate::env::{Env, EnvId, EnvStatus};
use crate::error::{SysError, SysResult};
use crate::mem::{allocator::FrameAllocator, memlayout::UTOP, VirtualAddress};
use crate::user::PgfaultUpcall;
use log::{info, trace};

fn check_va(va: VirtualAddress) -> SysResult<Page> {
    if va >= UTOP || !va.is_page_aligned() {
        return Err(SysError::Invalid);
    }
    Ok(Page::containing_address(va))
}

fn check_perm(perm: EntryFlags) -> SysResult<()> {
    if !perm.contains(EntryFlags::user())
        || !EntryFlags::SYSCALL.contains(perm)
        || perm.contains(EntryFlags::WRITABLE | EntryFlags::COW)
    {
        return Err(SysError::Invalid);
    }
    Ok(())
}

impl Kernel {
    // The caller may only act on itself or its immediate children.
    fn envid2env(&mut self, caller: EnvId, id: EnvId) -> SysResult<&mut Env> {
        let env = self.envs.get_mut(id).ok_or(SysError::BadEnv)?;
        if env.id != caller && env.parent_id != Some(caller) {
            return Err(SysError::BadEnv);
        }
        Ok(env)
    }

    fn check_caller(&self, caller: EnvId) -> SysResult<()> {
        self.envs.get(caller).map(|_| ()).ok_or(SysError::BadEnv)
    }

    pub fn sys_getenvid(&self, caller: EnvId) -> EnvId {
        caller
    }

    // Blank child: no mappings, not runnable, registers copied from the
    // caller except for the return value, which reads as zero in the child.
    pub fn sys_exofork(&mut self, caller: EnvId) -> SysResult<EnvId> {
        let parent = self.envs.get(caller).ok_or(SysError::BadEnv)?;
        let (tf, priority) = (parent.tf, parent.priority);

        let child = self.env_alloc(Some(caller), priority)?;
        let env = self.envs.get_mut(child).ok_or(SysError::BadEnv)?;
        env.status = EnvStatus::NotRunnable;
        env.tf = tf;
        env.tf.regs.eax = 0;

        info!("[{}] exofork {}", caller, child);
        Ok(child)
    }

    pub fn sys_env_set_status(
        &mut self,
        caller: EnvId,
        id: EnvId,
        status: EnvStatus,
    ) -> SysResult<()> {
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(SysError::Invalid);
        }
        self.envid2env(caller, id)?.status = status;
        Ok(())
    }

    pub fn sys_env_set_pgfault_upcall(
        &mut self,
        caller: EnvId,
        id: EnvId,
        upcall: PgfaultUpcall,
    ) -> SysResult<()> {
        self.envid2env(caller, id)?.pgfault_upcall = Some(upcall);
        Ok(())
    }

    pub fn sys_env_set_priority(
        &mut self,
        caller: EnvId,
        id: EnvId,
        priority: u32,
    ) -> SysResult<()> {
        self.envid2env(caller, id)?.priority = priority;
        Ok(())
    }

    pub fn sys_env_destroy(&mut self, caller: EnvId, id: EnvId) -> SysResult<()> {
        self.envid2env(caller, id)?;
        if caller == id {
            info!("[{}] exiting gracefully", caller);
        } else {
            info!("[{}] destroying {}", caller, id);
        }
        self.env_destroy(id)
    }

    // Fresh zeroed page at `va`, replacing any page already there.
    pub fn sys_page_alloc(
        &mut self,
        caller: EnvId,
        id: EnvId,
        va: VirtualAddress,
        perm: EntryFlags,
    ) -> SysResult<()> {
        let page = check_va(va)?;
        check_perm(perm)?;
        self.check_caller(caller)?;
        self.envid2env(caller, id)?;

        let frame = self.frames.allocate_frame().ok_or(SysError::NoMem)?;
        let env = self.envs.get_mut(id).ok_or(SysError::BadEnv)?;
        if let Err(err) = env.address_space.insert(&mut self.frames, page, frame, perm) {
            self.frames.deallocate_frame(frame);
            return Err(err.into());
        }
        Ok(())
    }

    // Maps the frame behind `src_va` in `src` at `dst_va` in `dst`. A
    // writable mapping of a read-only source page is refused.
    pub fn sys_page_map(
        &mut self,
        caller: EnvId,
        src: EnvId,
        src_va: VirtualAddress,
        dst: EnvId,
        dst_va: VirtualAddress,
        perm: EntryFlags,
    ) -> SysResult<()> {
        let src_page = check_va(src_va)?;
        let dst_page = check_va(dst_va)?;
        check_perm(perm)?;

        let entry = self
            .envid2env(caller, src)?
            .address_space
            .get(src_page)
            .ok_or(SysError::Invalid)?;
        if perm.contains(EntryFlags::WRITABLE) && !entry.flags().contains(EntryFlags::WRITABLE) {
            return Err(SysError::Invalid);
        }

        self.envid2env(caller, dst)?;
        let env = self.envs.get_mut(dst).ok_or(SysError::BadEnv)?;
        env.address_space
            .insert(&mut self.frames, dst_page, entry.frame(), perm)?;
        trace!(
            "[{}] map {}:{:#010x} -> {}:{:#010x} {:?}",
            caller,
            src,
            src_va,
            dst,
            dst_va,
            perm
        );
        Ok(())
    }

    // Unmapping a page that isn't mapped is not an error.
    pub fn sys_page_unmap(
        &mut self,
        caller: EnvId,
        id: EnvId,
        va: VirtualAddress,
    ) -> SysResult<()> {
        let page = check_va(va)?;
        self.envid2env(caller, id)?;
        let env = self.envs.get_mut(id).ok_or(SysError::BadEnv)?;
        env.address_space.remove(&mut self.frames, page);
        Ok(())
    }
}
