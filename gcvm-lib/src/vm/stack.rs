use crate::vm::{Error, Result, StackKind};
use std::ops::Deref;

/// A stack with a hard capacity. It never grows past `capacity`, running into
/// the limit is a fault, not a reason to reallocate.
#[derive(Debug)]
pub struct Stack<T> {
    items: Vec<T>,
    capacity: usize,
    kind: StackKind,
}

impl<T: Copy> Stack<T> {
    pub fn new(kind: StackKind, capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            kind,
        }
    }

    pub fn push(&mut self, item: T) -> Result<()> {
        if self.items.len() >= self.capacity {
            return Err(Error::StackOverflow(self.kind));
        }
        self.items.push(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<T> {
        self.items.pop().ok_or(Error::StackUnderflow(self.kind))
    }

    /// returns entries from the back. 0 is the last element,
    /// 1 is the second to last etc
    pub fn peek(&self, ridx: usize) -> Result<T> {
        self.items
            .len()
            .checked_sub(ridx + 1)
            .map(|i| self.items[i])
            .ok_or(Error::StackUnderflow(self.kind))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Deref for Stack<T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        &self.items
    }
}
