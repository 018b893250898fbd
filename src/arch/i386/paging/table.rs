use super::entry::Entry;
use super::PAGE_ENTRY_COUNT;
use alloc::boxed::Box;
use core::ops::{Index, IndexMut};

// Second level: one entry per 4 KiB page.
#[derive(Debug, Clone)]
pub struct PageTable {
    entries: [Option<Entry>; PAGE_ENTRY_COUNT],
}

impl PageTable {
    pub fn new() -> Box<Self> {
        Box::new(Self {
            entries: [None; PAGE_ENTRY_COUNT],
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Entry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_ref().map(|entry| (index, entry)))
    }
}

impl Index<usize> for PageTable {
    type Output = Option<Entry>;

    fn index(&self, index: usize) -> &Option<Entry> {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    fn index_mut(&mut self, index: usize) -> &mut Option<Entry> {
        &mut self.entries[index]
    }
}

// First level: a page table per 4 MiB region, created on first use.
#[derive(Debug, Clone)]
pub struct PageDirectory {
    tables: Box<[Option<Box<PageTable>>]>,
}

impl PageDirectory {
    pub fn new() -> Self {
        Self {
            tables: (0..PAGE_ENTRY_COUNT).map(|_| None).collect(),
        }
    }

    pub fn table(&self, pdx: usize) -> Option<&PageTable> {
        self.tables.get(pdx)?.as_deref()
    }

    pub fn table_mut(&mut self, pdx: usize) -> Option<&mut PageTable> {
        self.tables.get_mut(pdx)?.as_deref_mut()
    }

    pub fn table_create(&mut self, pdx: usize) -> Option<&mut PageTable> {
        let slot = self.tables.get_mut(pdx)?;
        Some(slot.get_or_insert_with(PageTable::new))
    }

    pub fn drop_table(&mut self, pdx: usize) {
        if let Some(slot) = self.tables.get_mut(pdx) {
            *slot = None;
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = (usize, &PageTable)> {
        self.tables
            .iter()
            .enumerate()
            .filter_map(|(pdx, table)| table.as_deref().map(|table| (pdx, table)))
    }
}
