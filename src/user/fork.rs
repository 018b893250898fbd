use super::pgfault::{set_pgfault_handler, PGFAULT};
use super::{ExoFork, UserSpace};
use crate::arch::{EntryFlags, Page};
use crate::env::{EnvId, EnvStatus};
use crate::error::SysError;
use crate::mem::memlayout::{PTSIZE, USTACKTOP, UTEXT, UTOP, UXSTACK};
use crate::mem::{align_down, VirtualAddress, PAGE_SIZE};
use core::fmt;
use log::{info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
    Parent(EnvId),
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    Handler(SysError),
    Exofork(SysError),
    BadAddress(VirtualAddress),
    NotMapped(VirtualAddress),
    Map(VirtualAddress, SysError),
    ExceptionStack(SysError),
    Upcall(SysError),
    SetStatus(SysError),
}

impl fmt::Display for ForkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForkError::Handler(err) => write!(f, "fork: installing fault handler: {}", err),
            ForkError::Exofork(err) => write!(f, "fork: sys_exofork: {}", err),
            ForkError::BadAddress(va) => write!(f, "duppage: {:#010x} is outside user space", va),
            ForkError::NotMapped(va) => write!(f, "duppage: {:#010x} is not mapped", va),
            ForkError::Map(va, err) => write!(f, "duppage: mapping {:#010x}: {}", va, err),
            ForkError::ExceptionStack(err) => write!(f, "fork: child exception stack: {}", err),
            ForkError::Upcall(err) => write!(f, "fork: child fault upcall: {}", err),
            ForkError::SetStatus(err) => write!(f, "fork: marking child runnable: {}", err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sharing {
    // writable and COW pages become COW on both sides
    CopyOnWrite,
    // pages are shared as they are, writable included
    Direct,
}

fn map_both_cow<U: UserSpace + ?Sized>(
    user: &mut U,
    child: EnvId,
    va: VirtualAddress,
) -> Result<(), ForkError> {
    let me = user.getenvid();
    let map = |err| ForkError::Map(va, err);
    user.page_map(me, va, child, va, EntryFlags::user_cow()).map_err(map)?;
    // ours goes COW too, even if it already was: a writable parent page
    // would let the parent scribble over what the child still reads
    user.page_map(me, va, me, va, EntryFlags::user_cow()).map_err(map)
}

fn dup<U: UserSpace + ?Sized>(
    user: &mut U,
    child: EnvId,
    page: Page,
    sharing: Sharing,
) -> Result<(), ForkError> {
    let va = page.start_address();
    if va >= UTOP {
        return Err(ForkError::BadAddress(va));
    }
    let entry = user
        .vpt(page)
        .filter(|entry| entry.is_user_mapped())
        .ok_or(ForkError::NotMapped(va))?;
    let flags = entry.flags();

    if flags.is_cow() || (sharing == Sharing::CopyOnWrite && flags.contains(EntryFlags::WRITABLE)) {
        trace!("dup {:#010x}: copy-on-write", va);
        map_both_cow(user, child, va)
    } else {
        trace!("dup {:#010x}: shared {:?}", va, flags & EntryFlags::SYSCALL);
        let me = user.getenvid();
        user.page_map(me, va, child, va, flags & EntryFlags::SYSCALL)
            .map_err(|err| ForkError::Map(va, err))
    }
}

/// Maps our page into `child` at the same address, copy-on-write if it is
/// writable or already COW, with identical permissions otherwise.
pub fn duppage<U: UserSpace + ?Sized>(
    user: &mut U,
    child: EnvId,
    page: Page,
) -> Result<(), ForkError> {
    dup(user, child, page, Sharing::CopyOnWrite)
}

/// Like `duppage` while `need_cow` holds; otherwise shares the page
/// directly, writable pages staying writable. COW pages stay COW either way.
pub fn sduppage<U: UserSpace + ?Sized>(
    user: &mut U,
    child: EnvId,
    page: Page,
    need_cow: bool,
) -> Result<(), ForkError> {
    let sharing = if need_cow {
        Sharing::CopyOnWrite
    } else {
        Sharing::Direct
    };
    dup(user, child, page, sharing)
}

// Every user page from UTEXT up to, not including, the exception stack.
fn dup_address_space<U: UserSpace + ?Sized>(user: &mut U, child: EnvId) -> Result<(), ForkError> {
    let mut va = UTEXT;
    while va < UXSTACK {
        if user.vpd(va).is_none() {
            // nothing mapped in the rest of this page table
            va = VirtualAddress::new(align_down(va.to_inner(), PTSIZE) + PTSIZE);
            continue;
        }
        if user.is_user_mapped(va) {
            duppage(user, child, Page::containing_address(va))?;
        }
        va = va.offset(PAGE_SIZE);
    }
    Ok(())
}

// Walks down from the top of the user stack. Pages above the first hole are
// the live stack and go copy-on-write; everything below is shared.
// TODO: a stack with a single unmapped page in the middle gets its lower part
// shared; needs the stack extent from the env rather than the first hole.
fn share_address_space<U: UserSpace + ?Sized>(user: &mut U, child: EnvId) -> Result<(), ForkError> {
    let mut in_stack = true;
    let mut va = USTACKTOP.sub(PAGE_SIZE);
    while va >= UTEXT {
        if user.is_user_mapped(va) {
            sduppage(user, child, Page::containing_address(va), in_stack)?;
        } else {
            in_stack = false;
        }
        va = va.sub(PAGE_SIZE);
    }
    Ok(())
}

// Fresh exception stack and upcall for the child, then let it run.
fn activate_child<U: UserSpace + ?Sized>(user: &mut U, child: EnvId) -> Result<(), ForkError> {
    user.page_alloc(child, UXSTACK, EntryFlags::user_rw()).map_err(ForkError::ExceptionStack)?;
    user.env_set_pgfault_upcall(child, PGFAULT).map_err(ForkError::Upcall)?;
    user.env_set_status(child, EnvStatus::Runnable).map_err(ForkError::SetStatus)
}

fn fork_with<U, F>(user: &mut U, copy: F) -> Result<ForkResult, ForkError>
where
    U: UserSpace + ?Sized,
    F: FnOnce(&mut U, EnvId) -> Result<(), ForkError>,
{
    set_pgfault_handler(user, PGFAULT).map_err(ForkError::Handler)?;

    let child = match user.exofork().map_err(ForkError::Exofork)? {
        ExoFork::Child => {
            let me = user.getenvid();
            user.set_thisenv(me);
            return Ok(ForkResult::Child);
        }
        ExoFork::Parent(child) => child,
    };

    let built = copy(user, child).and_then(|()| activate_child(user, child));
    if let Err(err) = built {
        warn!("[{}] fork of {} failed: {}", user.getenvid(), child, err);
        // never leave a half built child behind
        if let Err(destroy_err) = user.env_destroy(child) {
            warn!("[{}] destroying {}: {}", user.getenvid(), child, destroy_err);
        }
        return Err(err);
    }

    info!("[{}] forked {}", user.getenvid(), child);
    Ok(ForkResult::Parent(child))
}

/// User-level fork with copy-on-write. Returns in the parent with the
/// child's id and in the child with `ForkResult::Child`.
pub fn fork<U: UserSpace + ?Sized>(user: &mut U) -> Result<ForkResult, ForkError> {
    fork_with(user, dup_address_space)
}

/// Fork that shares the address space with the child, except for the live
/// part of the stack which is copy-on-write.
pub fn sfork<U: UserSpace + ?Sized>(user: &mut U) -> Result<ForkResult, ForkError> {
    fork_with(user, share_address_space)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arch::Entry;
    use crate::config::KernelConfig;
    use crate::error::SysResult;
    use crate::kern::testutil::{boot, map_filled, page_at, read_byte, va};
    use crate::kern::Kernel;
    use crate::locks::KernelLock;
    use crate::mem::allocator::FrameAllocator;
    use crate::user::{PgfaultUpcall, Syscall};
    use alloc::vec::Vec;

    fn parent_of(result: Result<ForkResult, ForkError>) -> EnvId {
        match result {
            Ok(ForkResult::Parent(child)) => child,
            other => panic!("fork returned {:?} in the parent", other),
        }
    }

    #[test]
    fn fork_makes_writable_pages_cow_on_both_sides() {
        let (mut kernel, parent) = boot();
        let rw = UTEXT;
        let ro = UTEXT.offset(PAGE_SIZE);
        let cow = UTEXT.offset(2 * PAGE_SIZE);
        // lives in the next page table
        let far = va(0x00c0_0000);
        let stack = USTACKTOP.sub(PAGE_SIZE);
        map_filled(&mut kernel, parent, rw, EntryFlags::user_rw(), 1);
        map_filled(&mut kernel, parent, ro, EntryFlags::user(), 2);
        map_filled(&mut kernel, parent, cow, EntryFlags::user_cow(), 3);
        map_filled(&mut kernel, parent, far, EntryFlags::user_rw(), 4);
        map_filled(&mut kernel, parent, stack, EntryFlags::user_rw(), 5);
        let before = page_at(&kernel, parent, ro).unwrap();

        let child = parent_of(fork(&mut kernel.user(parent)));

        for addr in [rw, cow, far, stack] {
            let mine = page_at(&kernel, parent, addr).unwrap();
            let theirs = page_at(&kernel, child, addr).unwrap();
            assert_eq!(mine.flags(), EntryFlags::user_cow(), "{:#x}", addr);
            assert_eq!(theirs, mine, "{:#x}", addr);
            assert_eq!(kernel.frames().refcount(mine.frame()), 2);
        }
        assert_eq!(page_at(&kernel, parent, ro), Some(before));
        assert_eq!(page_at(&kernel, child, ro), Some(before));

        assert_eq!(read_byte(&mut kernel, child, far), 4);
        assert_eq!(read_byte(&mut kernel, child, stack), 5);
        let count = |kernel: &Kernel, env| {
            kernel.env(env).unwrap().address_space().mapped().count()
        };
        assert_eq!(count(&kernel, child), count(&kernel, parent));
    }

    #[test]
    fn child_gets_its_own_exception_stack_and_runs() {
        let (mut kernel, parent) = boot();
        map_filled(&mut kernel, parent, UTEXT, EntryFlags::user_rw(), 1);
        kernel.sys_env_set_priority(parent, parent, 1).unwrap();

        let child = parent_of(fork(&mut kernel.user(parent)));

        let mine = page_at(&kernel, parent, UXSTACK).unwrap();
        let theirs = page_at(&kernel, child, UXSTACK).unwrap();
        assert_eq!(theirs.flags(), EntryFlags::user_rw());
        assert_ne!(theirs.frame(), mine.frame());
        assert_eq!(kernel.frames().refcount(theirs.frame()), 1);

        let env = kernel.env(child).unwrap();
        assert!(env.has_pgfault_upcall());
        assert_eq!(env.status(), EnvStatus::Runnable);
        assert_eq!(env.parent_id(), Some(parent));
        assert_eq!(env.priority(), 1);
    }

    #[test]
    fn sfork_shares_all_but_the_live_stack() {
        let (mut kernel, parent) = boot();
        let data = UTEXT.offset(PAGE_SIZE);
        map_filled(&mut kernel, parent, UTEXT, EntryFlags::user_cow(), 1);
        map_filled(&mut kernel, parent, data, EntryFlags::user_rw(), 2);
        // three stack pages, a hole, then two more pages below it
        let below = |n: u32| USTACKTOP.sub(n * PAGE_SIZE);
        for n in [1, 2, 3, 5, 6] {
            map_filled(&mut kernel, parent, below(n), EntryFlags::user_rw(), n as u8);
        }

        let child = parent_of(sfork(&mut kernel.user(parent)));

        for n in [1, 2, 3] {
            let mine = page_at(&kernel, parent, below(n)).unwrap();
            assert_eq!(mine.flags(), EntryFlags::user_cow());
            assert_eq!(page_at(&kernel, child, below(n)), Some(mine));
        }
        assert_eq!(page_at(&kernel, child, below(4)), None);
        for addr in [below(5), below(6), data] {
            let mine = page_at(&kernel, parent, addr).unwrap();
            assert_eq!(mine.flags(), EntryFlags::user_rw());
            assert_eq!(page_at(&kernel, child, addr), Some(mine));
        }
        // COW stays COW even in the shared part
        assert_eq!(
            page_at(&kernel, child, UTEXT).unwrap().flags(),
            EntryFlags::user_cow()
        );

        kernel.user(parent).write(data, &[0x77]).unwrap();
        assert_eq!(read_byte(&mut kernel, child, data), 0x77);
        kernel.user(parent).write(below(1), &[0x88]).unwrap();
        assert_eq!(read_byte(&mut kernel, child, below(1)), 1);
    }

    #[test]
    fn duppage_wants_a_mapped_user_page() {
        let (mut kernel, parent) = boot();
        let child = kernel.sys_exofork(parent).unwrap();
        let mut user = kernel.user(parent);
        assert_eq!(
            duppage(&mut user, child, Page::containing_address(UTOP)),
            Err(ForkError::BadAddress(UTOP))
        );
        assert_eq!(
            duppage(&mut user, child, Page::containing_address(UTEXT)),
            Err(ForkError::NotMapped(UTEXT))
        );
        assert_eq!(
            sduppage(&mut user, child, Page::containing_address(UTEXT), false),
            Err(ForkError::NotMapped(UTEXT))
        );
    }

    #[test]
    fn failed_fork_leaves_no_child_behind() {
        // room for the data page and our exception stack, not the child's
        let config = KernelConfig::default().with_nenv(8).with_nframes(2);
        let mut kernel = Kernel::boot(config).unwrap();
        let parent = kernel.env_create(2).unwrap();
        map_filled(&mut kernel, parent, UTEXT, EntryFlags::user_rw(), 9);

        assert_eq!(
            fork(&mut kernel.user(parent)),
            Err(ForkError::ExceptionStack(SysError::NoMem))
        );
        // the idle env and the parent
        assert_eq!(kernel.envs().iter().count(), 2);
        assert_eq!(kernel.frames().used_frames(), 2);
        let data = page_at(&kernel, parent, UTEXT).unwrap();
        assert_eq!(kernel.frames().refcount(data.frame()), 1);
        assert_eq!(read_byte(&mut kernel, parent, UTEXT), 9);
    }

    // What the child sees when it comes back from exofork.
    struct ChildSide {
        me: EnvId,
        thisenv: Option<EnvId>,
        calls: Vec<&'static str>,
    }

    impl Syscall for ChildSide {
        fn getenvid(&self) -> EnvId {
            self.me
        }

        fn exofork(&mut self) -> SysResult<ExoFork> {
            self.calls.push("exofork");
            Ok(ExoFork::Child)
        }

        fn env_set_status(&mut self, _: EnvId, _: EnvStatus) -> SysResult<()> {
            unreachable!("child sets status")
        }

        fn env_set_pgfault_upcall(&mut self, env: EnvId, _: PgfaultUpcall) -> SysResult<()> {
            assert_eq!(env, self.me);
            self.calls.push("upcall");
            Ok(())
        }

        fn env_set_priority(&mut self, _: EnvId, _: u32) -> SysResult<()> {
            unreachable!("child sets priority")
        }

        fn env_destroy(&mut self, _: EnvId) -> SysResult<()> {
            unreachable!("child destroys")
        }

        fn page_alloc(&mut self, _: EnvId, va: VirtualAddress, _: EntryFlags) -> SysResult<()> {
            assert_eq!(va, UXSTACK);
            self.calls.push("xstack");
            Ok(())
        }

        fn page_map(
            &mut self,
            _: EnvId,
            _: VirtualAddress,
            _: EnvId,
            _: VirtualAddress,
            _: EntryFlags,
        ) -> SysResult<()> {
            unreachable!("child maps pages")
        }

        fn page_unmap(&mut self, _: EnvId, _: VirtualAddress) -> SysResult<()> {
            unreachable!("child unmaps pages")
        }
    }

    impl UserSpace for ChildSide {
        fn vpd(&self, _: VirtualAddress) -> Option<EntryFlags> {
            None
        }

        fn vpt(&self, _: Page) -> Option<Entry> {
            None
        }

        fn read(&mut self, _: VirtualAddress, _: &mut [u8]) -> SysResult<()> {
            unreachable!("child reads")
        }

        fn write(&mut self, _: VirtualAddress, _: &[u8]) -> SysResult<()> {
            unreachable!("child writes")
        }

        fn thisenv(&self) -> Option<EnvId> {
            self.thisenv
        }

        fn set_thisenv(&mut self, env: EnvId) {
            self.thisenv = Some(env);
        }
    }

    #[test]
    fn child_returns_child_and_fixes_thisenv() {
        let parent = EnvId::new(1, 1);
        let mut side = ChildSide {
            me: EnvId::new(2, 1),
            // still the parent's, as copied by the fork
            thisenv: Some(parent),
            calls: Vec::new(),
        };

        assert_eq!(fork(&mut side), Ok(ForkResult::Child));
        assert_eq!(side.thisenv(), Some(side.me));
        assert_eq!(side.calls, ["xstack", "upcall", "exofork"]);

        side.thisenv = Some(parent);
        side.calls.clear();
        assert_eq!(sfork(&mut side), Ok(ForkResult::Child));
        assert_eq!(side.thisenv(), Some(side.me));
    }

    #[test]
    fn forked_envs_run_under_the_kernel_lock() {
        let (kernel, parent) = boot();
        let lock = KernelLock::new(kernel);

        let child = {
            let mut kernel = lock.lock(0);
            map_filled(&mut kernel, parent, UTEXT, EntryFlags::user_rw(), 7);
            let child = parent_of(fork(&mut kernel.user(parent)));
            child
        };
        assert_eq!(lock.holder(), None);

        let mut kernel = lock.lock(0);
        assert_eq!(kernel.sched_yield(0), Ok(parent));
        assert_eq!(kernel.sched_yield(0), Ok(child));
        assert_eq!(kernel.env(parent).unwrap().status(), EnvStatus::Runnable);

        kernel.user(child).write(UTEXT, &[8]).unwrap();
        assert_eq!(read_byte(&mut kernel, child, UTEXT), 8);
        assert_eq!(read_byte(&mut kernel, parent, UTEXT), 7);
        assert_eq!(kernel.sched_yield(0), Ok(parent));
    }
}
