//! The object heap and the tagged values that point into it.
//!
//! This Heap represents the VMs Heap (as in memory area, not as in data structure).
//! It is the only owner of every object, everything else holds [`ObjectRef`] handles.
//!
//! It uses 2 Vecs. If something is allocated, it is pushed to the slot vec. If it is freed,
//! the index is stored in the 2nd Vec, and reused on the next allocation. Freeing anywhere is O(1).
//! Every slot carries a generation that is bumped when the slot is freed, so a handle that outlived
//! its object never resolves to whatever reused the slot.
//!
//! Objects are only ever freed by the collector (see [`crate::gc`]).

use derive_more::{Display, From};

/// A handle to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(fmt = "#{}", index)]
pub struct ObjectRef {
    index: u32,
    generation: u32,
}

/// What lives on the operand stack and in global memory. Integers are boxed,
/// there is no unboxed variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum Value {
    #[default]
    #[display(fmt = "nil")]
    Nil,
    #[display(fmt = "{}", _0)]
    Object(ObjectRef),
}

impl From<ObjectRef> for Value {
    fn from(r: ObjectRef) -> Self {
        Value::Object(r)
    }
}

impl Value {
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Nil => None,
            Value::Object(r) => Some(*r),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub left: Value,
    pub right: Value,
}

/// Placeholder, there is no code attached to functions yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Function;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closure {
    pub function: ObjectRef,
    pub env: ObjectRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, From)]
pub enum Object {
    Int(i32),
    Pair(Pair),
    Function(Function),
    Closure(Closure),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Int(_) => "Int",
            Object::Pair(_) => "Pair",
            Object::Function(_) => "Function",
            Object::Closure(_) => "Closure",
        }
    }
}

/// Calls `visitor` for every reference going out of `object`.
///
/// This is the only place that knows the shape of the object graph, a new object
/// type has to be added here (and to the allocation functions) and nowhere else.
pub fn visit_children(object: &Object, mut visitor: impl FnMut(ObjectRef)) {
    match object {
        Object::Int(_) | Object::Function(_) => {}
        Object::Pair(Pair { left, right }) => {
            if let Some(r) = left.as_object() {
                visitor(r);
            }
            if let Some(r) = right.as_object() {
                visitor(r);
            }
        }
        Object::Closure(Closure { function, env }) => {
            visitor(*function);
            visitor(*env);
        }
    }
}

/// Allocation counters, `live` is always `created - freed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub created: usize,
    pub freed: usize,
    pub live: usize,
}

#[derive(Debug)]
struct Cell {
    object: Object,
    marked: bool,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    cell: Option<Cell>,
}

#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free_indices: Vec<usize>,
    created: usize,
    freed: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// registers a new object and returns its handle
    pub fn alloc(&mut self, object: impl Into<Object>) -> ObjectRef {
        let cell = Cell {
            object: object.into(),
            marked: false,
        };
        let index = if let Some(idx) = self.free_indices.pop() {
            self.slots[idx].cell = Some(cell);
            idx
        } else {
            self.slots.push(Slot {
                generation: 0,
                cell: Some(cell),
            });
            self.slots.len() - 1
        };
        self.created += 1;
        ObjectRef {
            index: index as u32,
            generation: self.slots[index].generation,
        }
    }

    pub fn make_int(&mut self, x: i32) -> Value {
        self.alloc(x).into()
    }

    /// the values are stored as they are, there is no deep copy
    pub fn make_pair(&mut self, left: Value, right: Value) -> Value {
        self.alloc(Pair { left, right }).into()
    }

    pub fn make_function(&mut self) -> Value {
        self.alloc(Function).into()
    }

    pub fn make_closure(&mut self, function: ObjectRef, env: ObjectRef) -> Value {
        self.alloc(Closure { function, env }).into()
    }

    fn cell(&self, r: ObjectRef) -> Option<&Cell> {
        self.slots
            .get(r.index as usize)
            .filter(|slot| slot.generation == r.generation)
            .and_then(|slot| slot.cell.as_ref())
    }

    fn cell_mut(&mut self, r: ObjectRef) -> Option<&mut Cell> {
        self.slots
            .get_mut(r.index as usize)
            .filter(|slot| slot.generation == r.generation)
            .and_then(|slot| slot.cell.as_mut())
    }

    pub fn get(&self, r: ObjectRef) -> Option<&Object> {
        self.cell(r).map(|c| &c.object)
    }

    pub fn get_mut(&mut self, r: ObjectRef) -> Option<&mut Object> {
        self.cell_mut(r).map(|c| &mut c.object)
    }

    pub fn contains(&self, r: ObjectRef) -> bool {
        self.cell(r).is_some()
    }

    /// the registry: every live object with its handle
    pub fn iter(&self) -> impl Iterator<Item = (ObjectRef, &Object)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.cell.as_ref().map(|cell| {
                (
                    ObjectRef {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    &cell.object,
                )
            })
        })
    }

    /// number of live objects
    pub fn len(&self) -> usize {
        self.created - self.freed
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            created: self.created,
            freed: self.freed,
            live: self.len(),
        }
    }

    pub fn is_marked(&self, r: ObjectRef) -> bool {
        self.cell(r).map_or(false, |c| c.marked)
    }

    /// sets the mark bit. Returns false if it was already set or if `r` is stale
    pub(crate) fn mark(&mut self, r: ObjectRef) -> bool {
        match self.cell_mut(r) {
            Some(cell) if !cell.marked => {
                cell.marked = true;
                true
            }
            _ => false,
        }
    }

    /// frees every unmarked object and clears the mark bit of the survivors.
    /// Returns the number of freed objects.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let Some(cell) = &mut slot.cell else {
                continue;
            };
            if cell.marked {
                cell.marked = false;
                continue;
            }
            slot.cell = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free_indices.push(idx);
            freed += 1;
        }
        self.freed += freed;
        freed
    }

    /// human readable rendering of a value, one level deep
    pub fn describe(&self, value: Value) -> String {
        let Value::Object(r) = value else {
            return "nil".into();
        };
        match self.get(r) {
            Some(Object::Int(x)) => format!("Int({})", x),
            Some(Object::Pair(Pair { left, right })) => format!("Pair({}, {})", left, right),
            Some(Object::Function(_)) => "Function".into(),
            Some(Object::Closure(Closure { function, env })) => {
                format!("Closure({}, {})", function, env)
            }
            None => format!("<dangling {}>", r),
        }
    }
}
