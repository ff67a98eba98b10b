//! Session memory: last bound value per variable, with transactional layers.
//!
//! A [`Memory`] is a stack of layers. [`Memory::fork`] pushes a new empty layer on top of
//! a frozen snapshot of the current one, so a speculative branch reads through to its
//! parent but its writes stay local until [`Memory::commit`] merges them back. Sibling
//! forks never observe each other.

use crate::bits::BitBuffer;
use crate::variable::VariableId;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Memory {
    parent: Option<Arc<Memory>>,
    /// `None` marks a key forgotten in this layer.
    entries: HashMap<VariableId, Option<BitBuffer>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: VariableId) -> Option<BitBuffer> {
        match self.entries.get(&id) {
            Some(slot) => slot.clone(),
            None => self.parent.as_ref().and_then(|p| p.get(id)),
        }
    }

    pub fn has(&self, id: VariableId) -> bool {
        self.get(id).is_some()
    }

    /// Unconditional overwrite.
    pub fn memorize(&mut self, id: VariableId, value: BitBuffer) {
        self.entries.insert(id, Some(value));
    }

    pub fn forget(&mut self, id: VariableId) {
        if self.parent.is_some() {
            self.entries.insert(id, None);
        } else {
            self.entries.remove(&id);
        }
    }

    /// Child layer reading through to a snapshot of `self`.
    pub fn fork(&self) -> Memory {
        Memory {
            parent: Some(Arc::new(self.clone())),
            entries: HashMap::new(),
        }
    }

    /// Merge the local writes of `child` (a fork of `self`) into `self`.
    pub fn commit(&mut self, child: &Memory) {
        for (id, slot) in &child.entries {
            match slot {
                Some(value) => self.memorize(*id, value.clone()),
                None => self.forget(*id),
            }
        }
    }

    /// Every visible binding, flattened.
    pub fn snapshot(&self) -> HashMap<VariableId, BitBuffer> {
        let mut out = match &self.parent {
            Some(parent) => parent.snapshot(),
            None => HashMap::new(),
        };
        for (id, slot) in &self.entries {
            match slot {
                Some(value) => {
                    out.insert(*id, value.clone());
                }
                None => {
                    out.remove(id);
                }
            }
        }
        out
    }

    /// Number of writes local to this layer.
    pub fn local_len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
