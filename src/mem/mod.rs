pub mod allocator;
pub mod frame;
pub mod memlayout;

pub const PAGE_SIZE: u32 = 4096;

pub const fn align_down(value: u32, align: u32) -> u32 {
    value & !(align - 1)
}

pub const fn align_up(value: u32, align: u32) -> u32 {
    align_down(value + (align - 1), align)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn to_inner(self) -> u32 {
        self.0
    }

    pub const fn offset(&self, offset: u32) -> Self {
        Self::new(self.0 + offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn to_inner(self) -> u32 {
        self.0
    }

    pub const fn offset(&self, offset: u32) -> Self {
        Self::new(self.0 + offset)
    }

    // wraps on underflow, callers compare against the layout bounds
    pub const fn sub(&self, offset: u32) -> Self {
        Self::new(self.0.wrapping_sub(offset))
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    pub const fn page_offset(&self) -> u32 {
        self.0 % PAGE_SIZE
    }

    pub const fn align_down(&self) -> Self {
        Self::new(align_down(self.0, PAGE_SIZE))
    }
}

impl core::fmt::LowerHex for VirtualAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl core::fmt::LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::LowerHex::fmt(&self.0, f)
    }
}
