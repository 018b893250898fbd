pub mod entry;
pub mod page;
pub mod table;

pub use entry::{Entry, EntryFlags};
pub use page::Page;

use crate::error::SysError;
use crate::mem::{allocator::FrameAllocator, frame::Frame, VirtualAddress};
use log::trace;
use table::PageDirectory;

pub const PAGE_ENTRY_COUNT: usize = 1024;
// pages addressable through one directory
pub const PAGE_COUNT: u32 = (PAGE_ENTRY_COUNT * PAGE_ENTRY_COUNT) as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    OutOfRange(Page),
    NotPresent(Page),
    // writability must only come back through a private copy
    WritableCow(Page),
}

impl From<PagingError> for SysError {
    fn from(_: PagingError) -> Self {
        SysError::Invalid
    }
}

// A two-level address space. Entries are handed out by value, so nothing
// outside this type can hold a pointer into a live table.
#[derive(Debug)]
pub struct AddressSpace {
    directory: PageDirectory,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self {
            directory: PageDirectory::new(),
        }
    }

    // Directory-level view of `va`: present when the covering page table exists.
    pub fn pde(&self, va: VirtualAddress) -> Option<EntryFlags> {
        self.directory
            .table(va.pdx())
            .map(|_| EntryFlags::user_rw())
    }

    pub fn get(&self, page: Page) -> Option<Entry> {
        if page.number() >= PAGE_COUNT {
            return None;
        }
        self.directory.table(page.pdx())?[page.ptx()]
    }

    pub fn set(&mut self, page: Page, entry: Entry) -> Result<(), PagingError> {
        check(page, entry.flags())?;
        let table = self
            .directory
            .table_create(page.pdx())
            .ok_or(PagingError::OutOfRange(page))?;
        table[page.ptx()] = Some(entry);
        Ok(())
    }

    fn take(&mut self, page: Page) -> Option<Entry> {
        if page.number() >= PAGE_COUNT {
            return None;
        }
        let pdx = page.pdx();
        let table = self.directory.table_mut(pdx)?;
        let old = table[page.ptx()].take();
        if table.is_empty() {
            self.directory.drop_table(pdx);
        }
        old
    }

    // Maps `frame` at `page`, replacing whatever was there. The new frame is
    // referenced before the old one is released so a frame can be remapped
    // onto itself with new permissions.
    pub fn insert<A: FrameAllocator>(
        &mut self,
        allocator: &mut A,
        page: Page,
        frame: Frame,
        flags: EntryFlags,
    ) -> Result<(), PagingError> {
        check(page, flags)?;
        allocator.incref(frame);
        let old = self.get(page);
        if let Err(err) = self.set(page, Entry::new(frame, flags)) {
            allocator.decref(frame);
            return Err(err);
        }
        if let Some(old) = old {
            allocator.decref(old.frame());
        }
        trace!(
            "mapped page {:#x} -> frame {:#x} ({:?})",
            page.start_address(),
            frame.number,
            flags
        );
        Ok(())
    }

    pub fn remove<A: FrameAllocator>(&mut self, allocator: &mut A, page: Page) -> Option<Entry> {
        let old = self.take(page)?;
        allocator.decref(old.frame());
        Some(old)
    }

    // releases every mapping, used when the owning env is freed
    pub fn clear<A: FrameAllocator>(&mut self, allocator: &mut A) {
        let pages: alloc::vec::Vec<Page> = self.mapped().map(|(page, _)| page).collect();
        for page in pages {
            self.remove(allocator, page);
        }
    }

    pub fn mapped(&self) -> impl Iterator<Item = (Page, Entry)> + '_ {
        self.directory.tables().flat_map(|(pdx, table)| {
            table
                .iter()
                .map(move |(ptx, entry)| (Page::from_indices(pdx, ptx), *entry))
        })
    }
}

fn check(page: Page, flags: EntryFlags) -> Result<(), PagingError> {
    if page.number() >= PAGE_COUNT {
        return Err(PagingError::OutOfRange(page));
    }
    if !flags.contains(EntryFlags::PRESENT) {
        return Err(PagingError::NotPresent(page));
    }
    if flags.contains(EntryFlags::WRITABLE | EntryFlags::COW) {
        return Err(PagingError::WritableCow(page));
    }
    Ok(())
}
