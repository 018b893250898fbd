use super::PAGE_ENTRY_COUNT;
use crate::mem::{VirtualAddress, PAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Page {
    number: u32,
}

impl Page {
    pub fn containing_address(address: VirtualAddress) -> Page {
        Page {
            number: address.to_inner() / PAGE_SIZE,
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn start_address(&self) -> VirtualAddress {
        VirtualAddress::new(self.number * PAGE_SIZE)
    }

    // index into the page directory
    pub fn pdx(&self) -> usize {
        (self.number as usize >> 10) & (PAGE_ENTRY_COUNT - 1)
    }

    // index into the page table
    pub fn ptx(&self) -> usize {
        self.number as usize & (PAGE_ENTRY_COUNT - 1)
    }

    pub(super) fn from_indices(pdx: usize, ptx: usize) -> Page {
        Page {
            number: ((pdx << 10) | ptx) as u32,
        }
    }
}

impl VirtualAddress {
    pub fn pdx(&self) -> usize {
        (self.to_inner() as usize >> 22) & (PAGE_ENTRY_COUNT - 1)
    }

    pub fn ptx(&self) -> usize {
        (self.to_inner() as usize >> 12) & (PAGE_ENTRY_COUNT - 1)
    }
}
