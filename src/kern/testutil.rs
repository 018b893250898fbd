use super::Kernel;
use crate::arch::{Entry, EntryFlags, Page};
use crate::config::KernelConfig;
use crate::env::EnvId;
use crate::mem::VirtualAddress;
use crate::user::UserSpace;

pub(crate) fn va(addr: u32) -> VirtualAddress {
    VirtualAddress::new(addr)
}

// Kernel with a single CPU and one runnable user env.
pub(crate) fn boot() -> (Kernel, EnvId) {
    let mut kernel = Kernel::boot(KernelConfig::default().with_nenv(16).with_nframes(64))
        .expect("boot");
    let env = kernel.spawn().expect("spawn");
    (kernel, env)
}

pub(crate) fn page_at(kernel: &Kernel, env: EnvId, va: VirtualAddress) -> Option<Entry> {
    kernel
        .env(env)?
        .address_space()
        .get(Page::containing_address(va))
}

// Maps a fresh page filled with `fill`, then drops it to `flags`.
pub(crate) fn map_filled(
    kernel: &mut Kernel,
    env: EnvId,
    va: VirtualAddress,
    flags: EntryFlags,
    fill: u8,
) {
    kernel
        .sys_page_alloc(env, env, va, EntryFlags::user_rw())
        .expect("page_alloc");
    kernel
        .user(env)
        .write(va, &[fill; crate::mem::PAGE_SIZE as usize])
        .expect("fill");
    kernel
        .sys_page_map(env, env, va, env, va, flags)
        .expect("remap");
}

pub(crate) fn read_byte(kernel: &mut Kernel, env: EnvId, va: VirtualAddress) -> u8 {
    let mut byte = [0u8];
    kernel.user(env).read(va, &mut byte).expect("read");
    byte[0]
}

// All mappings of `env` except the one at `skip`.
pub(crate) fn mappings_except(
    kernel: &Kernel,
    env: EnvId,
    skip: Page,
) -> alloc::vec::Vec<(Page, Entry)> {
    kernel
        .env(env)
        .map(|env| {
            env.address_space()
                .mapped()
                .filter(|(page, _)| *page != skip)
                .collect()
        })
        .unwrap_or_default()
}
