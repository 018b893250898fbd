use super::id::{next_generation, EnvId};
use super::{Env, EnvStatus, EnvType};
use crate::error::{SysError, SysResult};
use alloc::vec::Vec;

#[derive(Debug)]
struct Slot {
    generation: u32,
    env: Option<Env>,
}

// Fixed-capacity arena of env slots. Slots below `reserved` belong to the
// per-CPU idle envs and are only handed out by `alloc_reserved`.
#[derive(Debug)]
pub struct EnvTable {
    slots: Vec<Slot>,
    reserved: usize,
}

impl EnvTable {
    pub fn new(capacity: usize, reserved: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| Slot {
                    generation: 0,
                    env: None,
                })
                .collect(),
            reserved,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn alloc(&mut self, parent_id: Option<EnvId>, priority: u32) -> SysResult<EnvId> {
        let index = (self.reserved..self.slots.len())
            .find(|&index| self.slots[index].env.is_none())
            .ok_or(SysError::NoFreeEnv)?;
        Ok(self.fill(index, parent_id, EnvType::User, priority))
    }

    pub fn alloc_reserved(&mut self, index: usize, priority: u32) -> SysResult<EnvId> {
        match self.slots.get(index) {
            Some(slot) if index < self.reserved && slot.env.is_none() => {
                Ok(self.fill(index, None, EnvType::Idle, priority))
            }
            _ => Err(SysError::NoFreeEnv),
        }
    }

    fn fill(
        &mut self,
        index: usize,
        parent_id: Option<EnvId>,
        env_type: EnvType,
        priority: u32,
    ) -> EnvId {
        let slot = &mut self.slots[index];
        slot.generation = next_generation(slot.generation);
        let id = EnvId::new(index, slot.generation);
        slot.env = Some(Env::new(id, parent_id, env_type, priority));
        id
    }

    pub fn free(&mut self, id: EnvId) -> Option<Env> {
        let slot = self.slots.get_mut(id.index())?;
        match &slot.env {
            Some(env) if env.id == id => slot.env.take(),
            _ => None,
        }
    }

    pub fn get(&self, id: EnvId) -> Option<&Env> {
        self.slots
            .get(id.index())?
            .env
            .as_ref()
            .filter(|env| env.id == id)
    }

    pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        self.slots
            .get_mut(id.index())?
            .env
            .as_mut()
            .filter(|env| env.id == id)
    }

    // whatever lives in the slot, regardless of generation
    pub fn slot(&self, index: usize) -> Option<&Env> {
        self.slots.get(index)?.env.as_ref()
    }

    pub fn status(&self, index: usize) -> EnvStatus {
        self.slot(index).map_or(EnvStatus::Free, |env| env.status)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Env> {
        self.slots.iter().filter_map(|slot| slot.env.as_ref())
    }

    // Every live env once, starting at slot `start` and wrapping around to
    // `start - 1`. Cloning the iterator restarts the pass from where it is.
    pub fn scan_from(&self, start: usize) -> impl Iterator<Item = &Env> + Clone {
        let start = if start >= self.slots.len() { 0 } else { start };
        let (head, tail) = self.slots.split_at(start);
        tail.iter()
            .chain(head.iter())
            .filter_map(|slot| slot.env.as_ref())
    }
}
