use super::{PgfaultUpcall, UserSpace};
use crate::arch::{EntryFlags, FaultCause, Page, UTrapframe};
use crate::error::{SysError, SysResult};
use crate::mem::memlayout::{PFTEMP, UXSTACK};
use crate::mem::VirtualAddress;
use core::fmt;
use log::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    // read or instruction fetch, never a COW fault
    NotWrite(VirtualAddress),
    NoPageTable(VirtualAddress),
    // genuinely read-only or unmapped page
    NotCow(VirtualAddress),
    Sys(VirtualAddress, SysError),
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultError::NotWrite(va) => write!(f, "pgfault: non-write access at {:#010x}", va),
            FaultError::NoPageTable(va) => write!(f, "pgfault: no page table for {:#010x}", va),
            FaultError::NotCow(va) => write!(f, "pgfault: {:#010x} is not copy-on-write", va),
            FaultError::Sys(va, err) => write!(f, "pgfault: copying {:#010x}: {}", va, err),
        }
    }
}

// Installs `handler` as the env's page fault upcall. The exception stack is
// allocated the first time, so calling this again only swaps the handler.
pub fn set_pgfault_handler<U: UserSpace + ?Sized>(
    user: &mut U,
    handler: PgfaultUpcall,
) -> SysResult<()> {
    let me = user.getenvid();
    if !user.is_user_mapped(UXSTACK) {
        user.page_alloc(me, UXSTACK, EntryFlags::user_rw())?;
    }
    user.env_set_pgfault_upcall(me, handler)
}

/// The copy-on-write fault handler installed by `fork`.
pub const PGFAULT: PgfaultUpcall = PgfaultUpcall(pgfault);

// Gives the faulting env a private, writable copy of a COW page.
pub fn pgfault(user: &mut dyn UserSpace, utf: &UTrapframe) -> Result<(), FaultError> {
    let addr = utf.fault_va;
    if !utf.err.contains(FaultCause::WRITE) {
        return Err(FaultError::NotWrite(addr));
    }
    if user.vpd(addr).is_none() {
        return Err(FaultError::NoPageTable(addr));
    }
    let page = Page::containing_address(addr);
    match user.vpt(page) {
        Some(entry) if entry.flags().is_cow() => {}
        _ => return Err(FaultError::NotCow(addr)),
    }

    let addr = page.start_address();
    let sys = |err| FaultError::Sys(addr, err);
    let me = user.getenvid();

    user.page_alloc(me, PFTEMP, EntryFlags::user_rw()).map_err(sys)?;
    // replaces the shared mapping in place
    let copied = user
        .copy_page(PFTEMP, addr)
        .and_then(|()| user.page_map(me, PFTEMP, me, addr, EntryFlags::user_rw()));
    // the scratch page goes either way
    let unmapped = user.page_unmap(me, PFTEMP);
    copied.and(unmapped).map_err(sys)?;

    trace!("[{}] private copy of {:#010x}", me, addr);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arch::{Entry, Trapframe};
    use crate::env::{EnvId, EnvStatus};
    use crate::kern::UserEnv;
    use crate::kern::testutil::{boot, map_filled, mappings_except, page_at, read_byte, va};
    use crate::mem::allocator::FrameAllocator;
    use crate::mem::memlayout::UTEXT;
    use crate::mem::PAGE_SIZE;
    use crate::user::fork::{fork, ForkResult};
    use crate::user::{ExoFork, Syscall};

    fn utf(fault_va: VirtualAddress, err: FaultCause) -> UTrapframe {
        UTrapframe::new(&Trapframe::default(), fault_va, err)
    }

    #[test]
    fn handler_install_is_idempotent() {
        let (mut kernel, env) = boot();
        set_pgfault_handler(&mut kernel.user(env), PGFAULT).unwrap();
        let xstack = page_at(&kernel, env, UXSTACK).unwrap();
        assert_eq!(xstack.flags(), EntryFlags::user_rw());

        set_pgfault_handler(&mut kernel.user(env), PGFAULT).unwrap();
        assert_eq!(page_at(&kernel, env, UXSTACK).unwrap(), xstack);
        assert_eq!(kernel.frames().used_frames(), 1);
        assert!(kernel.env(env).unwrap().has_pgfault_upcall());
    }

    #[test]
    fn rejects_every_fault_without_the_write_bit() {
        let (mut kernel, env) = boot();
        map_filled(&mut kernel, env, UTEXT, EntryFlags::user_cow(), 7);
        for bits in 0..8u32 {
            let cause = FaultCause::from_bits_truncate(bits);
            if cause.contains(FaultCause::WRITE) {
                continue;
            }
            assert_eq!(
                pgfault(&mut kernel.user(env), &utf(UTEXT, cause)),
                Err(FaultError::NotWrite(UTEXT))
            );
        }
        assert_eq!(page_at(&kernel, env, UTEXT).unwrap().flags(), EntryFlags::user_cow());
    }

    #[test]
    fn rejects_write_faults_outside_cow_pages() {
        let (mut kernel, env) = boot();
        let write = FaultCause::WRITE | FaultCause::USER;
        map_filled(&mut kernel, env, UTEXT, EntryFlags::user(), 7);

        assert_eq!(
            pgfault(&mut kernel.user(env), &utf(UTEXT, write | FaultCause::PROTECTION)),
            Err(FaultError::NotCow(UTEXT))
        );
        // same page table, nothing mapped
        let hole = UTEXT.offset(PAGE_SIZE);
        assert_eq!(
            pgfault(&mut kernel.user(env), &utf(hole, write)),
            Err(FaultError::NotCow(hole))
        );
        let far = va(0x4000_0000);
        assert_eq!(
            pgfault(&mut kernel.user(env), &utf(far, write)),
            Err(FaultError::NoPageTable(far))
        );
    }

    #[test]
    fn resolving_a_fault_touches_only_the_faulting_page() {
        let (mut kernel, parent) = boot();
        map_filled(&mut kernel, parent, UTEXT, EntryFlags::user_rw(), 0x5a);
        map_filled(&mut kernel, parent, UTEXT.offset(PAGE_SIZE), EntryFlags::user_rw(), 0x11);
        let child = match fork(&mut kernel.user(parent)).unwrap() {
            ForkResult::Parent(child) => child,
            ForkResult::Child => unreachable!(),
        };

        let page = Page::containing_address(UTEXT);
        let shared = page_at(&kernel, parent, UTEXT).unwrap();
        let others = mappings_except(&kernel, parent, page);
        let used = kernel.frames().used_frames();

        let cause = FaultCause::WRITE | FaultCause::PROTECTION | FaultCause::USER;
        pgfault(&mut kernel.user(parent), &utf(UTEXT.offset(0x123), cause)).unwrap();

        let private = page_at(&kernel, parent, UTEXT).unwrap();
        assert_eq!(private.flags(), EntryFlags::user_rw());
        assert_ne!(private.frame(), shared.frame());
        assert_eq!(mappings_except(&kernel, parent, page), others);
        assert_eq!(page_at(&kernel, parent, PFTEMP), None);
        // one new frame, the shared one now only referenced by the child
        assert_eq!(kernel.frames().used_frames(), used + 1);
        assert_eq!(kernel.frames().refcount(shared.frame()), 1);
        assert_eq!(page_at(&kernel, child, UTEXT).unwrap(), shared);

        let mut copy = [0u8; PAGE_SIZE as usize];
        kernel.user(parent).read(UTEXT, &mut copy).unwrap();
        assert!(copy.iter().all(|&b| b == 0x5a));
    }

    // Forwards to the env but turns down every page_map.
    struct RefusingMap<'k>(UserEnv<'k>);

    impl Syscall for RefusingMap<'_> {
        fn getenvid(&self) -> EnvId {
            self.0.getenvid()
        }

        fn exofork(&mut self) -> SysResult<ExoFork> {
            self.0.exofork()
        }

        fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> SysResult<()> {
            self.0.env_set_status(env, status)
        }

        fn env_set_pgfault_upcall(&mut self, env: EnvId, upcall: PgfaultUpcall) -> SysResult<()> {
            self.0.env_set_pgfault_upcall(env, upcall)
        }

        fn env_set_priority(&mut self, env: EnvId, priority: u32) -> SysResult<()> {
            self.0.env_set_priority(env, priority)
        }

        fn env_destroy(&mut self, env: EnvId) -> SysResult<()> {
            self.0.env_destroy(env)
        }

        fn page_alloc(
            &mut self,
            env: EnvId,
            va: VirtualAddress,
            perm: EntryFlags,
        ) -> SysResult<()> {
            self.0.page_alloc(env, va, perm)
        }

        fn page_map(
            &mut self,
            _: EnvId,
            _: VirtualAddress,
            _: EnvId,
            _: VirtualAddress,
            _: EntryFlags,
        ) -> SysResult<()> {
            Err(SysError::NoMem)
        }

        fn page_unmap(&mut self, env: EnvId, va: VirtualAddress) -> SysResult<()> {
            self.0.page_unmap(env, va)
        }
    }

    impl UserSpace for RefusingMap<'_> {
        fn vpd(&self, va: VirtualAddress) -> Option<EntryFlags> {
            self.0.vpd(va)
        }

        fn vpt(&self, page: Page) -> Option<Entry> {
            self.0.vpt(page)
        }

        fn read(&mut self, va: VirtualAddress, buf: &mut [u8]) -> SysResult<()> {
            self.0.read(va, buf)
        }

        fn write(&mut self, va: VirtualAddress, data: &[u8]) -> SysResult<()> {
            self.0.write(va, data)
        }

        fn thisenv(&self) -> Option<EnvId> {
            self.0.thisenv()
        }

        fn set_thisenv(&mut self, env: EnvId) {
            self.0.set_thisenv(env)
        }
    }

    #[test]
    fn failed_remap_drops_the_scratch_page() {
        let (mut kernel, env) = boot();
        map_filled(&mut kernel, env, UTEXT, EntryFlags::user_cow(), 3);
        let used = kernel.frames().used_frames();
        let cause = FaultCause::WRITE | FaultCause::PROTECTION | FaultCause::USER;

        let mut user = RefusingMap(kernel.user(env));
        assert_eq!(
            pgfault(&mut user, &utf(UTEXT, cause)),
            Err(FaultError::Sys(UTEXT, SysError::NoMem))
        );
        drop(user);

        assert_eq!(page_at(&kernel, env, PFTEMP), None);
        assert_eq!(kernel.frames().used_frames(), used);
        assert_eq!(page_at(&kernel, env, UTEXT).unwrap().flags(), EntryFlags::user_cow());
    }

    #[test]
    fn writes_to_cow_pages_go_through_the_upcall() {
        let (mut kernel, parent) = boot();
        map_filled(&mut kernel, parent, UTEXT, EntryFlags::user_rw(), 1);
        let child = match fork(&mut kernel.user(parent)).unwrap() {
            ForkResult::Parent(child) => child,
            ForkResult::Child => unreachable!(),
        };

        kernel.user(parent).write(UTEXT, &[2]).unwrap();
        assert_eq!(read_byte(&mut kernel, parent, UTEXT), 2);
        assert_eq!(read_byte(&mut kernel, parent, UTEXT.offset(1)), 1);
        assert_eq!(read_byte(&mut kernel, child, UTEXT), 1);

        // the private copy is plain writable, no second fault
        let used = kernel.frames().used_frames();
        kernel.user(parent).write(UTEXT.offset(8), &[3]).unwrap();
        assert_eq!(kernel.frames().used_frames(), used);

        kernel.user(child).write(UTEXT, &[4]).unwrap();
        assert_eq!(read_byte(&mut kernel, child, UTEXT), 4);
        assert_eq!(read_byte(&mut kernel, parent, UTEXT), 2);
        assert_eq!(page_at(&kernel, child, UTEXT).unwrap().flags(), EntryFlags::user_rw());
    }

    #[test]
    fn a_real_protection_fault_ends_the_env() {
        let (mut kernel, env) = boot();
        map_filled(&mut kernel, env, UTEXT, EntryFlags::user(), 1);
        set_pgfault_handler(&mut kernel.user(env), PGFAULT).unwrap();

        assert_eq!(kernel.user(env).write(UTEXT, &[0]), Err(SysError::Fault));
        assert!(kernel.env(env).is_none());
        assert_eq!(kernel.frames().used_frames(), 0);
    }

    #[test]
    fn faults_without_an_upcall_end_the_env() {
        let (mut kernel, env) = boot();
        map_filled(&mut kernel, env, UTEXT, EntryFlags::user_cow(), 1);
        let mut byte = [0u8];
        // reads of COW pages are fine
        kernel.user(env).read(UTEXT, &mut byte).unwrap();
        assert_eq!(kernel.user(env).write(UTEXT, &[0]), Err(SysError::Fault));
        assert!(kernel.env(env).is_none());
    }

    #[test]
    fn missing_exception_stack_ends_the_env() {
        let (mut kernel, env) = boot();
        map_filled(&mut kernel, env, UTEXT, EntryFlags::user_cow(), 1);
        set_pgfault_handler(&mut kernel.user(env), PGFAULT).unwrap();
        kernel.user(env).page_unmap(env, UXSTACK).unwrap();

        assert_eq!(kernel.user(env).write(UTEXT, &[0]), Err(SysError::Fault));
        assert!(kernel.env(env).is_none());
    }
}
