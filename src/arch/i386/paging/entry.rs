use crate::mem::frame::Frame;
use bitflags::bitflags;

bitflags! {
    pub struct EntryFlags: u32 {
        const PRESENT =         1 << 0;
        const WRITABLE =        1 << 1;
        const USER_ACCESSIBLE = 1 << 2;
        const WRITE_THROUGH =   1 << 3;
        const NO_CACHE =        1 << 4;
        const ACCESSED =        1 << 5;
        const DIRTY =           1 << 6;
        const HUGE_PAGE =       1 << 7;
        const GLOBAL =          1 << 8;
        // bits 9..=11 are left to software
        const AVAIL =           0x7 << 9;
        // shared until written, then privately copied by the fault handler
        const COW =             1 << 11;

        // the only bits user code may pass to the mapping syscalls
        const SYSCALL = Self::AVAIL.bits
            | Self::PRESENT.bits
            | Self::WRITABLE.bits
            | Self::USER_ACCESSIBLE.bits;
    }
}

impl EntryFlags {
    pub const fn user() -> Self {
        Self::from_bits_truncate(Self::PRESENT.bits | Self::USER_ACCESSIBLE.bits)
    }

    pub const fn user_rw() -> Self {
        Self::from_bits_truncate(
            Self::PRESENT.bits | Self::USER_ACCESSIBLE.bits | Self::WRITABLE.bits,
        )
    }

    pub const fn user_cow() -> Self {
        Self::from_bits_truncate(Self::PRESENT.bits | Self::USER_ACCESSIBLE.bits | Self::COW.bits)
    }

    pub fn is_cow(&self) -> bool {
        self.contains(Self::COW)
    }
}

// One page table entry: the frame it points at and its permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    frame: Frame,
    flags: EntryFlags,
}

impl Entry {
    pub fn new(frame: Frame, flags: EntryFlags) -> Self {
        Self { frame, flags }
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn flags(&self) -> EntryFlags {
        self.flags
    }

    pub fn is_user_mapped(&self) -> bool {
        self.flags
            .contains(EntryFlags::PRESENT | EntryFlags::USER_ACCESSIBLE)
    }
}
