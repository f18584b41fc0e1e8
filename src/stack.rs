//! The single runtime stack shared by a whole run.
//!
//! Layout, bottom to top: the static region (indexed from zero), then one
//! frame per active routine. Inside a frame the arguments sit below the base
//! pointer (negative offsets) and the locals at and above it.
//!
//! The stack never resolves names; callers hand it absolute slots.

use crate::value::{ArrayRef, ObjectRef, Value};

/// Storage location a by-reference parameter can alias.
#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Stack(usize),
    Element(ArrayRef, usize),
    Field(ObjectRef, usize),
}

/// Content of one stack slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Direct(Value),
    /// By-reference argument: reads and writes go to the aliased place.
    Slot(Place),
}

impl Default for Cell {
    fn default() -> Self {
        Cell::Direct(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SavedFrame {
    base_pointer: usize,
    frame_start: usize,
}

#[derive(Debug, Default)]
pub struct RuntimeStack {
    cells: Vec<Cell>,
    base_pointer: usize,
    frames: Vec<SavedFrame>,
    statics: usize,
}

impl RuntimeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the static region. Only valid before any frame is pushed.
    pub fn with_statics(count: usize) -> Self {
        Self {
            cells: vec![Cell::default(); count],
            base_pointer: count,
            frames: Vec::new(),
            statics: count,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn static_count(&self) -> usize {
        self.statics
    }

    pub fn base_pointer(&self) -> usize {
        self.base_pointer
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    pub fn pop(&mut self) -> Option<Cell> {
        if self.cells.len() <= self.statics {
            return None;
        }
        self.cells.pop()
    }

    /// Absolute slot for a frame-relative offset, if it lies on the stack.
    pub fn frame_slot(&self, offset: i64) -> Option<usize> {
        let slot = self.base_pointer as i64 + offset;
        if slot < 0 || slot as usize >= self.cells.len() {
            None
        } else {
            Some(slot as usize)
        }
    }

    pub fn read(&self, slot: usize) -> Option<&Cell> {
        self.cells.get(slot)
    }

    /// Returns false when `slot` is not on the stack.
    pub fn write(&mut self, slot: usize, cell: Cell) -> bool {
        match self.cells.get_mut(slot) {
            Some(existing) => {
                *existing = cell;
                true
            }
            None => false,
        }
    }

    /// Open a frame above the arguments already pushed, with `local_count`
    /// fresh local slots.
    pub fn push_frame(&mut self, local_count: usize, arg_count: usize) {
        let frame_start = self.cells.len().saturating_sub(arg_count).max(self.statics);
        self.frames.push(SavedFrame {
            base_pointer: self.base_pointer,
            frame_start,
        });
        self.base_pointer = self.cells.len();
        self.cells.resize(self.cells.len() + local_count, Cell::default());
    }

    /// Discard the innermost frame together with its arguments.
    /// Returns false when there is no frame to pop.
    pub fn pop_frame(&mut self) -> bool {
        match self.frames.pop() {
            Some(saved) => {
                self.cells.truncate(saved.frame_start);
                self.base_pointer = saved.base_pointer;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(stack: &RuntimeStack, slot: usize) -> Value {
        match stack.read(slot) {
            Some(Cell::Direct(value)) => value.clone(),
            other => panic!("expected direct cell, got {:?}", other),
        }
    }

    #[test]
    fn statics_live_below_every_frame() {
        let mut stack = RuntimeStack::with_statics(2);
        assert!(stack.write(1, Cell::Direct(Value::Integer(9))));

        stack.push_frame(3, 0);
        assert_eq!(stack.base_pointer(), 2);
        assert_eq!(stack.len(), 5);
        assert!(stack.pop_frame());

        assert_eq!(stack.len(), 2);
        assert_eq!(direct(&stack, 1), Value::Integer(9));
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn arguments_sit_below_the_base_pointer() {
        let mut stack = RuntimeStack::with_statics(0);
        // Arguments are pushed last-first so argument i lives at offset -(i+1).
        stack.push(Cell::Direct(Value::Integer(20)));
        stack.push(Cell::Direct(Value::Integer(10)));
        stack.push_frame(1, 2);

        let first = stack.frame_slot(-1).unwrap();
        let second = stack.frame_slot(-2).unwrap();
        assert_eq!(direct(&stack, first), Value::Integer(10));
        assert_eq!(direct(&stack, second), Value::Integer(20));
        assert_eq!(direct(&stack, stack.frame_slot(0).unwrap()), Value::Null);

        assert!(stack.pop_frame());
        assert!(stack.is_empty());
    }

    #[test]
    fn nested_frames_restore_the_base_pointer() {
        let mut stack = RuntimeStack::with_statics(1);
        stack.push_frame(2, 0);
        let outer = stack.base_pointer();
        stack.write(outer, Cell::Direct(Value::Integer(5)));

        stack.push_frame(4, 0);
        assert_eq!(stack.depth(), 2);
        assert!(stack.pop_frame());

        assert_eq!(stack.base_pointer(), outer);
        assert_eq!(direct(&stack, outer), Value::Integer(5));
        assert!(stack.pop_frame());
        assert!(!stack.pop_frame());
    }

    #[test]
    fn out_of_range_slots_are_rejected() {
        let mut stack = RuntimeStack::with_statics(1);
        assert!(!stack.write(4, Cell::default()));
        assert_eq!(stack.frame_slot(-5), None);
        assert!(stack.read(3).is_none());
    }
}
