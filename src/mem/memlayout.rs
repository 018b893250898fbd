// User part of the virtual address space, top down:
//
//   ULIM      0xef800000  ----------------------------------
//                          read-only self mapping (vpt/vpd)
//   UVPT      0xef400000  ----------------------------------
//                          pages + envs read-only
//   UTOP
//   UXSTACKTOP 0xeec00000 ----------------------------------
//                          user exception stack  (one page)
//                         ----------------------------------
//                          empty guard page
//   USTACKTOP 0xeebfe000  ----------------------------------
//                          normal user stack, grows down
//                              ...
//   UTEXT     0x00800000  ----------------------------------
//   PFTEMP    0x007ff000   fault handler scratch page
//   UTEMP     0x00400000  ----------------------------------

use super::{VirtualAddress, PAGE_SIZE};

// bytes mapped by one page table
pub const PTSIZE: u32 = PAGE_SIZE * 1024;

pub const ULIM: VirtualAddress = VirtualAddress::new(0xef80_0000);
pub const UVPT: VirtualAddress = VirtualAddress::new(ULIM.to_inner() - PTSIZE);
pub const UPAGES: VirtualAddress = VirtualAddress::new(UVPT.to_inner() - PTSIZE);
pub const UENVS: VirtualAddress = VirtualAddress::new(UPAGES.to_inner() - PTSIZE);

pub const UTOP: VirtualAddress = UENVS;
pub const UXSTACKTOP: VirtualAddress = UTOP;
pub const USTACKTOP: VirtualAddress = VirtualAddress::new(UTOP.to_inner() - 2 * PAGE_SIZE);

pub const UTEXT: VirtualAddress = VirtualAddress::new(2 * PTSIZE);
pub const UTEMP: VirtualAddress = VirtualAddress::new(PTSIZE);
pub const PFTEMP: VirtualAddress = VirtualAddress::new(UTEMP.to_inner() + PTSIZE - PAGE_SIZE);

/// Base of the one-page exception stack.
pub const UXSTACK: VirtualAddress = VirtualAddress::new(UXSTACKTOP.to_inner() - PAGE_SIZE);
