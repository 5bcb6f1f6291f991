use std::fmt;

use crate::{MemoryError, Value};

pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Address of a memory slot. The generation is bumped every time the slot is
/// freed, so a handle kept past `free` no longer matches and is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    page: u32,
    slot: u32,
    generation: u32,
}

impl SlotHandle {
    #[must_use]
    pub fn page(&self) -> usize {
        self.page as usize
    }

    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot as usize
    }

    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}:{}#{}", self.page, self.slot, self.generation)
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    used: bool,
    generation: u32,
    value: Value,
}

/// A fixed capacity slab of value slots.
#[derive(Debug, Clone)]
pub struct Page {
    slots: Box<[Slot]>,
    used: usize,
}

impl Page {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Slot::default(); capacity].into_boxed_slice(),
            used: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.used == self.slots.len()
    }

    fn free_slot(&self) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        self.slots.iter().position(|slot| !slot.used)
    }

    fn occupy(&mut self, index: usize, value: Value) -> u32 {
        let slot = &mut self.slots[index];
        slot.used = true;
        slot.value = value;
        self.used += 1;
        slot.generation
    }
}

/// Page based slab allocator for anonymous values.
///
/// Allocation takes the first free slot of the first page that has one and
/// appends a page when every page is full. Pages are never released.
#[derive(Debug, Clone)]
pub struct MemoryManager {
    pages: Vec<Page>,
    page_size: usize,
}

impl MemoryManager {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            pages: Vec::new(),
            page_size: page_size.max(1),
        }
    }

    pub fn allocate(&mut self, value: Value) -> SlotHandle {
        let found = self
            .pages
            .iter()
            .enumerate()
            .find_map(|(index, page)| page.free_slot().map(|slot| (index, slot)));

        let (page_index, slot) = match found {
            Some(found) => found,
            None => {
                self.pages.push(Page::new(self.page_size));
                log::trace!("memory: appended page {}", self.pages.len() - 1);
                (self.pages.len() - 1, 0)
            }
        };

        let generation = self.pages[page_index].occupy(slot, value);
        handle(page_index, slot, generation)
    }

    pub fn free(&mut self, handle: SlotHandle) -> Result<Value, MemoryError> {
        let page = self
            .pages
            .get_mut(handle.page())
            .ok_or(MemoryError::OutOfRange(handle))?;
        let slot = page
            .slots
            .get_mut(handle.slot())
            .ok_or(MemoryError::OutOfRange(handle))?;
        if !slot.used && slot.generation == handle.generation.wrapping_add(1) {
            return Err(MemoryError::DoubleFree(handle));
        }
        if !slot.used || slot.generation != handle.generation {
            return Err(MemoryError::StaleHandle(handle));
        }
        slot.used = false;
        slot.generation = slot.generation.wrapping_add(1);
        page.used -= 1;
        Ok(std::mem::take(&mut slot.value))
    }

    pub fn read(&self, handle: SlotHandle) -> Result<&Value, MemoryError> {
        self.live_slot(handle).map(|slot| &slot.value)
    }

    pub fn write(
        &mut self,
        handle: SlotHandle,
        value: Value,
    ) -> Result<(), MemoryError> {
        self.live_slot(handle)?;
        self.pages[handle.page()].slots[handle.slot()].value = value;
        Ok(())
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[must_use]
    pub fn used_slots(&self) -> usize {
        self.pages.iter().map(Page::used).sum()
    }

    #[must_use]
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    fn live_slot(&self, handle: SlotHandle) -> Result<&Slot, MemoryError> {
        let slot = self
            .pages
            .get(handle.page())
            .and_then(|page| page.slots.get(handle.slot()))
            .ok_or(MemoryError::OutOfRange(handle))?;
        if !slot.used || slot.generation != handle.generation {
            return Err(MemoryError::StaleHandle(handle));
        }
        Ok(slot)
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

fn handle(page: usize, slot: usize, generation: u32) -> SlotHandle {
    SlotHandle {
        page: page as u32,
        slot: slot as u32,
        generation,
    }
}
