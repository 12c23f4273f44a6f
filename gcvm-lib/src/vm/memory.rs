use crate::vm::heap::Value;
use std::ops::Deref;

/// number of global memory slots
pub const MEM_SIZE: usize = 256;

/// The global memory that LOAD and STORE address. Every slot starts out as nil.
#[derive(Debug)]
pub struct Memory {
    slots: [Value; MEM_SIZE],
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            slots: [Value::Nil; MEM_SIZE],
        }
    }
}

impl Memory {
    fn slot(index: i32) -> Option<usize> {
        usize::try_from(index).ok().filter(|i| *i < MEM_SIZE)
    }

    /// None if the index is out of range
    pub fn load(&self, index: i32) -> Option<Value> {
        Self::slot(index).map(|i| self.slots[i])
    }

    /// None if the index is out of range
    pub fn store(&mut self, index: i32, value: Value) -> Option<()> {
        let i = Self::slot(index)?;
        self.slots[i] = value;
        Some(())
    }

    /// every slot that holds something other than nil
    pub fn occupied(&self) -> impl Iterator<Item = (usize, Value)> + '_ {
        self.slots
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
    }
}

impl Deref for Memory {
    type Target = [Value];
    fn deref(&self) -> &[Value] {
        &self.slots
    }
}
