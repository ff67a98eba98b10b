//! Paths: one candidate thread of parsing or specialization.
//!
//! A path owns its bindings (variable -> span of its data buffer), its pending relation
//! callbacks and a forked [`Memory`]. Bindings are a persistent list, so cloning a path to
//! fork it costs O(1) for the bindings regardless of how many variables are bound.

use crate::bits::BitBuffer;
use crate::memory::Memory;
use crate::types::DataType;
use crate::value::Value;
use crate::variable::{NodeKind, RelationKind, VariableId, VariableTree};
use serde::Serialize;
use std::sync::Arc;

/// Location of a bound value inside the path's data, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn new(offset: usize, len: usize) -> Self {
        Span { offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

#[derive(Debug)]
struct Binding {
    id: VariableId,
    span: Span,
    next: Option<Arc<Binding>>,
}

// Unlink iteratively; long repeats would otherwise recurse once per binding on drop.
impl Drop for Binding {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut owned) => next = owned.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// Persistent association list; the most recent binding of an id shadows older ones.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    head: Option<Arc<Binding>>,
    len: usize,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: VariableId) -> Option<Span> {
        let mut current = self.head.as_ref();
        while let Some(node) = current {
            if node.id == id {
                return Some(node.span);
            }
            current = node.next.as_ref();
        }
        None
    }

    pub fn contains(&self, id: VariableId) -> bool {
        self.get(id).is_some()
    }

    pub fn insert(&mut self, id: VariableId, span: Span) {
        self.head = Some(Arc::new(Binding {
            id,
            span,
            next: self.head.take(),
        }));
        self.len += 1;
    }

    /// Number of bindings made, repeated ones included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every binding, oldest first.
    pub fn entries(&self) -> Vec<(VariableId, Span)> {
        let mut out = Vec::with_capacity(self.len);
        let mut current = self.head.as_ref();
        while let Some(node) = current {
            out.push((node.id, node.span));
            current = node.next.as_ref();
        }
        out.reverse();
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PathState {
    #[default]
    Building,
    Complete,
    Failed,
}

/// A named, decoded field read off a path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    pub name: String,
    pub value: Value,
    #[serde(skip)]
    pub bits: BitBuffer,
}

/// Shared behaviour of both path flavours.
pub trait GenericPath: Clone {
    /// Buffer the spans index into: the input when parsing, the output when specializing.
    fn data(&self) -> &BitBuffer;
    fn data_mut(&mut self) -> &mut BitBuffer;
    fn bindings(&self) -> &Bindings;
    fn bindings_mut(&mut self) -> &mut Bindings;
    fn memory(&self) -> &Memory;
    fn memory_mut(&mut self) -> &mut Memory;
    fn pending(&self) -> &[VariableId];
    fn pending_mut(&mut self) -> &mut Vec<VariableId>;
    fn state(&self) -> PathState;
    fn set_state(&mut self, state: PathState);

    fn bind(&mut self, id: VariableId, span: Span) {
        self.bindings_mut().insert(id, span);
    }

    fn span_of(&self, id: VariableId) -> Option<Span> {
        self.bindings().get(id)
    }

    fn value_of(&self, id: VariableId) -> Option<BitBuffer> {
        let span = self.bindings().get(id)?;
        self.data().slice(span.offset, span.len)
    }

    fn is_bound(&self, id: VariableId) -> bool {
        self.bindings().contains(id)
    }

    fn register_callback(&mut self, relation: VariableId) {
        if !self.pending().contains(&relation) {
            self.pending_mut().push(relation);
        }
    }

    fn is_ok(&self) -> bool {
        self.state() != PathState::Failed
    }

    /// Named leaves and relations bound on this path, in binding order.
    fn fields(&self, tree: &VariableTree) -> Vec<FieldValue> {
        self.bindings()
            .entries()
            .into_iter()
            .filter_map(|(id, span)| {
                let var = tree.get(id)?;
                let name = var.name.clone()?;
                let bits = self.data().slice(span.offset, span.len)?;
                let value = match &var.kind {
                    NodeKind::Leaf(leaf) => decode_or_raw(&leaf.data_type, &bits),
                    NodeKind::Relation(relation) => match &relation.kind {
                        RelationKind::Size { format, .. } | RelationKind::Checksum { format, .. } => {
                            decode_or_raw(&DataType::Integer(*format), &bits)
                        }
                        _ => raw_value(&bits),
                    },
                    _ => return None,
                };
                Some(FieldValue { name, value, bits })
            })
            .collect()
    }
}

fn raw_value(bits: &BitBuffer) -> Value {
    if bits.is_byte_aligned() {
        Value::Bytes(bits.to_bytes())
    } else {
        Value::Bits(bits.iter().collect())
    }
}

fn decode_or_raw(data_type: &DataType, bits: &BitBuffer) -> Value {
    if bits.is_empty() {
        return raw_value(bits);
    }
    data_type.decode(bits).unwrap_or_else(|_| raw_value(bits))
}

/// Consumes an input buffer from a cursor.
#[derive(Debug, Clone)]
pub struct ParsingPath {
    input: BitBuffer,
    cursor: usize,
    bindings: Bindings,
    pending: Vec<VariableId>,
    memory: Memory,
    state: PathState,
}

impl ParsingPath {
    /// `memory` is forked: the session memory is only touched by an explicit commit.
    pub fn new(input: BitBuffer, memory: &Memory) -> Self {
        ParsingPath {
            input,
            cursor: 0,
            bindings: Bindings::new(),
            pending: Vec::new(),
            memory: memory.fork(),
            state: PathState::Building,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.input.len() - self.cursor
    }

    pub fn advance(&mut self, bits: usize) {
        self.cursor = (self.cursor + bits).min(self.input.len());
    }

    /// The next `len` bits, if there are that many left.
    pub fn peek(&self, len: usize) -> Option<BitBuffer> {
        self.input.slice(self.cursor, len)
    }

    pub fn is_fully_consumed(&self) -> bool {
        self.cursor == self.input.len()
    }

    pub fn consumed(&self) -> BitBuffer {
        self.input.slice(0, self.cursor).unwrap_or_default()
    }
}

impl GenericPath for ParsingPath {
    fn data(&self) -> &BitBuffer {
        &self.input
    }
    fn data_mut(&mut self) -> &mut BitBuffer {
        &mut self.input
    }
    fn bindings(&self) -> &Bindings {
        &self.bindings
    }
    fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }
    fn memory(&self) -> &Memory {
        &self.memory
    }
    fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }
    fn pending(&self) -> &[VariableId] {
        &self.pending
    }
    fn pending_mut(&mut self) -> &mut Vec<VariableId> {
        &mut self.pending
    }
    fn state(&self) -> PathState {
        self.state
    }
    fn set_state(&mut self, state: PathState) {
        self.state = state;
    }
}

/// Accumulates an output buffer.
#[derive(Debug, Clone)]
pub struct SpecializingPath {
    output: BitBuffer,
    bindings: Bindings,
    pending: Vec<VariableId>,
    memory: Memory,
    state: PathState,
}

impl SpecializingPath {
    pub fn new(memory: &Memory) -> Self {
        SpecializingPath {
            output: BitBuffer::new(),
            bindings: Bindings::new(),
            pending: Vec::new(),
            memory: memory.fork(),
            state: PathState::Building,
        }
    }

    pub fn position(&self) -> usize {
        self.output.len()
    }

    /// Append `bits` and return where they landed.
    pub fn emit(&mut self, bits: &BitBuffer) -> Span {
        let span = Span::new(self.output.len(), bits.len());
        self.output.append(bits);
        span
    }

    pub fn into_data(self) -> BitBuffer {
        self.output
    }
}

impl GenericPath for SpecializingPath {
    fn data(&self) -> &BitBuffer {
        &self.output
    }
    fn data_mut(&mut self) -> &mut BitBuffer {
        &mut self.output
    }
    fn bindings(&self) -> &Bindings {
        &self.bindings
    }
    fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }
    fn memory(&self) -> &Memory {
        &self.memory
    }
    fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }
    fn pending(&self) -> &[VariableId] {
        &self.pending
    }
    fn pending_mut(&mut self) -> &mut Vec<VariableId> {
        &mut self.pending
    }
    fn state(&self) -> PathState {
        self.state
    }
    fn set_state(&mut self, state: PathState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forked_bindings_are_isolated() {
        let a = VariableId::new();
        let b = VariableId::new();
        let mut left = Bindings::new();
        left.insert(a, Span::new(0, 8));
        let mut right = left.clone();
        right.insert(b, Span::new(8, 8));
        assert!(!left.contains(b));
        assert_eq!(right.get(a), Some(Span::new(0, 8)));
        assert_eq!(right.entries().len(), 2);
    }

    #[test]
    fn latest_binding_shadows() {
        let a = VariableId::new();
        let mut bindings = Bindings::new();
        bindings.insert(a, Span::new(0, 8));
        bindings.insert(a, Span::new(8, 16));
        assert_eq!(bindings.get(a), Some(Span::new(8, 16)));
        assert_eq!(bindings.entries()[0].1, Span::new(0, 8));
    }

    #[test]
    fn parsing_path_cursor_and_peek() {
        let memory = Memory::new();
        let mut path = ParsingPath::new(BitBuffer::from_bytes(&[1, 2, 3]), &memory);
        assert_eq!(path.peek(16), Some(BitBuffer::from_bytes(&[1, 2])));
        path.advance(16);
        assert_eq!(path.remaining(), 8);
        assert!(path.peek(16).is_none());
        assert_eq!(path.consumed().to_bytes(), vec![1, 2]);
    }

    #[test]
    fn specializing_path_emits_spans() {
        let memory = Memory::new();
        let mut path = SpecializingPath::new(&memory);
        let id = VariableId::new();
        let span = path.emit(&BitBuffer::from_bytes(&[0xAA]));
        path.bind(id, span);
        path.emit(&BitBuffer::from_bytes(&[0xBB]));
        assert_eq!(path.value_of(id), Some(BitBuffer::from_bytes(&[0xAA])));
        assert_eq!(path.into_data().to_hex(), "aabb");
    }
}
