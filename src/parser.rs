//! Variable parser: bits -> bindings.
//!
//! Depth-first search with explicit forking. Every node kind returns the list of paths
//! that survive it; an empty list means "no match here" and is never an error. Errors are
//! reserved for an ill-formed tree and for an exhausted search budget.

use crate::bits::BitBuffer;
use crate::budget::Budget;
use crate::config::EngineConfig;
use crate::error::DomainError;
use crate::memory::Memory;
use crate::path::{GenericPath, ParsingPath, PathState, Span};
use crate::relation::{Computed, Direction, RelationScope, SizeHint};
use crate::variable::{Leaf, NodeKind, Recall, Relation, Repeat, Svas, Variable, VariableId, VariableTree};
use tracing::{debug, trace};

pub struct VariableParser<'t> {
    tree: &'t VariableTree,
    config: EngineConfig,
}

impl<'t> VariableParser<'t> {
    pub fn new(tree: &'t VariableTree) -> Self {
        Self::with_config(tree, EngineConfig::default())
    }

    pub fn with_config(tree: &'t VariableTree, config: EngineConfig) -> Self {
        VariableParser { tree, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Every complete parse of `input` from `root`: all relations verified and all input
    /// consumed. Each path carries a fork of `memory` holding what it learned; `memory`
    /// itself is left untouched.
    pub fn parse(&self, root: VariableId, input: &BitBuffer, memory: &Memory) -> Result<Vec<ParsingPath>, DomainError> {
        self.tree.node(root)?;
        let mut run = ParseRun {
            scope: RelationScope::new(self.tree, root),
            config: &self.config,
            budget: Budget::new(self.config.parse_budget),
        };
        let paths = run.parse_node(root, ParsingPath::new(input.clone(), memory))?;
        let candidates = paths.len();
        let complete: Vec<ParsingPath> = paths
            .into_iter()
            .filter_map(|mut path| {
                if let Some(relation) = path.pending().first() {
                    trace!(relation = %self.tree.name_of(*relation), "dropping path with unresolved relation");
                    return None;
                }
                if !path.is_fully_consumed() {
                    trace!(left = path.remaining(), "dropping partial path");
                    return None;
                }
                path.set_state(PathState::Complete);
                Some(path)
            })
            .collect();
        debug!(
            root = %self.tree.name_of(root),
            candidates,
            results = complete.len(),
            steps = run.budget.used(),
            "parse finished"
        );
        Ok(complete)
    }

    /// First complete parse; its memory writes are committed into `memory`.
    pub fn parse_first(
        &self,
        root: VariableId,
        input: &BitBuffer,
        memory: &mut Memory,
    ) -> Result<Option<ParsingPath>, DomainError> {
        let first = self.parse(root, input, memory)?.into_iter().next();
        if let Some(path) = &first {
            memory.commit(path.memory());
        }
        Ok(first)
    }
}

struct ParseRun<'t> {
    scope: RelationScope<'t>,
    config: &'t EngineConfig,
    budget: Budget,
}

impl<'t> ParseRun<'t> {
    fn parse_node(&mut self, id: VariableId, path: ParsingPath) -> Result<Vec<ParsingPath>, DomainError> {
        self.budget.step()?;
        let tree = self.scope.tree;
        let var = tree.node(id)?;
        let start = path.cursor();
        let results = match &var.kind {
            NodeKind::Leaf(leaf) => self.parse_leaf(var, leaf, path)?,
            NodeKind::Aggregate(children) => self.parse_aggregate(children, path)?,
            NodeKind::Alternative(children) => self.parse_alternative(children, path)?,
            NodeKind::Repeat(repeat) => self.parse_repeat(repeat, path)?,
            NodeKind::Relation(relation) => self.parse_relation(var, relation, path)?,
        };
        let binds_itself = matches!(var.kind, NodeKind::Leaf(_) | NodeKind::Relation(_));
        let mut out = Vec::with_capacity(results.len());
        for mut path in results {
            if !binds_itself {
                let len = path.cursor() - start;
                path.bind(id, Span::new(start, len));
            }
            if path.pending().is_empty() || self.scope.resolve_pending(&mut path, Direction::Parse).is_ok() {
                out.push(path);
            }
        }
        Ok(out)
    }

    fn parse_leaf(&mut self, var: &Variable, leaf: &Leaf, path: ParsingPath) -> Result<Vec<ParsingPath>, DomainError> {
        let known = match var.svas {
            Svas::Constant => match path.memory().get(var.id).or_else(|| leaf.value.clone()) {
                Some(value) => Some(vec![value]),
                None => {
                    trace!(leaf = %var.display_name(), "constant leaf without a value");
                    return Ok(Vec::new());
                }
            },
            Svas::Persistent => path.memory().get(var.id).or_else(|| leaf.value.clone()).map(|value| {
                let mut accepted = vec![value.clone()];
                if var.recall == Recall::Increment {
                    if let Ok(next) = leaf.data_type.increment(&value) {
                        accepted.push(next);
                    }
                }
                accepted
            }),
            Svas::Ephemeral | Svas::Volatile => None,
        };

        let mut out = Vec::new();
        if let Some(accepted) = known {
            for value in accepted {
                self.budget.step()?;
                if path.peek(value.len()).as_ref() == Some(&value) {
                    out.push(accept_leaf(var, &path, value.len()));
                }
            }
            return Ok(out);
        }

        for len in self.candidate_lengths(var.id, leaf, &path) {
            self.budget.step()?;
            let Some(bits) = path.peek(len) else {
                continue;
            };
            if len > 0 && !(leaf.data_type.can_parse(&bits) && leaf.data_type.decode(&bits).is_ok()) {
                continue;
            }
            out.push(accept_leaf(var, &path, len));
        }
        if out.is_empty() {
            trace!(leaf = %var.display_name(), at = path.cursor(), "no candidate length decodes");
        }
        Ok(out)
    }

    /// Longest first. A bound size relation pins the length exactly.
    fn candidate_lengths(&self, id: VariableId, leaf: &Leaf, path: &ParsingPath) -> Vec<usize> {
        let remaining = path.remaining();
        match self.scope.size_hint(id, path) {
            SizeHint::Exact(len) if leaf.size.contains(len) && len <= remaining => return vec![len],
            SizeHint::Exact(_) | SizeHint::Unsatisfiable => return Vec::new(),
            SizeHint::Open => {}
        }
        let step = leaf.data_type.length_step().max(1);
        let max = leaf
            .size
            .max
            .unwrap_or_else(|| self.config.max_generation_bits())
            .min(remaining);
        if max < leaf.size.min {
            return Vec::new();
        }
        (leaf.size.min..=max).rev().filter(|len| len % step == 0).collect()
    }

    fn parse_aggregate(&mut self, children: &[VariableId], path: ParsingPath) -> Result<Vec<ParsingPath>, DomainError> {
        let mut frontier = vec![path];
        for child in children {
            let mut next = Vec::new();
            for path in frontier {
                next.extend(self.parse_node(*child, path)?);
            }
            if next.is_empty() {
                return Ok(next);
            }
            frontier = next;
        }
        Ok(frontier)
    }

    fn parse_alternative(&mut self, children: &[VariableId], path: ParsingPath) -> Result<Vec<ParsingPath>, DomainError> {
        let mut out = Vec::new();
        for child in children {
            out.extend(self.parse_node(*child, path.clone())?);
        }
        Ok(out)
    }

    /// Level by level: level `k` holds the paths after `k` repetitions. Results list the
    /// highest counts first.
    fn parse_repeat(&mut self, repeat: &Repeat, path: ParsingPath) -> Result<Vec<ParsingPath>, DomainError> {
        let mut levels: Vec<Vec<ParsingPath>> = Vec::new();
        let mut current = vec![path];
        let mut count = 0usize;
        loop {
            if count >= repeat.min {
                levels.push(current.clone());
            }
            if current.is_empty() || repeat.max.is_some_and(|max| count >= max) {
                break;
            }
            let mut next = Vec::new();
            for mut path in current {
                self.budget.step()?;
                let before = path.cursor();
                if count > 0 {
                    if let Some(delimiter) = &repeat.delimiter {
                        if path.peek(delimiter.len()).as_ref() != Some(delimiter) {
                            continue;
                        }
                        path.advance(delimiter.len());
                    }
                }
                for grown in self.parse_node(repeat.child, path)? {
                    // A zero-width repetition cannot make progress past the minimum.
                    if grown.cursor() == before && count >= repeat.min {
                        continue;
                    }
                    next.push(grown);
                }
            }
            current = next;
            count += 1;
        }
        Ok(levels.into_iter().rev().flatten().collect())
    }

    fn parse_relation(
        &mut self,
        var: &Variable,
        relation: &Relation,
        mut path: ParsingPath,
    ) -> Result<Vec<ParsingPath>, DomainError> {
        let start = path.cursor();
        match self.scope.compute(var.id, &path) {
            Computed::Value(expected) => {
                if path.peek(expected.len()).as_ref() != Some(&expected) {
                    trace!(relation = %var.display_name(), %expected, "wire value does not match");
                    return Ok(Vec::new());
                }
                path.bind(var.id, Span::new(start, expected.len()));
                path.advance(expected.len());
                Ok(vec![path])
            }
            Computed::Failed(reason) => {
                trace!(relation = %var.display_name(), %reason, "relation cannot hold");
                Ok(Vec::new())
            }
            Computed::NotReady => {
                let width = relation
                    .fixed_width()
                    .or_else(|| self.scope.tree.static_width(var.id));
                let Some(width) = width else {
                    trace!(relation = %var.display_name(), "width unknown before targets");
                    return Ok(Vec::new());
                };
                if path.remaining() < width {
                    return Ok(Vec::new());
                }
                path.bind(var.id, Span::new(start, width));
                path.advance(width);
                path.register_callback(var.id);
                Ok(vec![path])
            }
        }
    }
}

/// Fork `path`, bind `len` bits at the cursor to the leaf and apply its memory policy.
fn accept_leaf(var: &Variable, path: &ParsingPath, len: usize) -> ParsingPath {
    let mut next = path.clone();
    next.bind(var.id, Span::new(next.cursor(), len));
    next.advance(len);
    if matches!(var.svas, Svas::Ephemeral | Svas::Persistent) {
        if let Some(bits) = next.value_of(var.id) {
            next.memory_mut().memorize(var.id, bits);
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Endianness, IntegerFormat, Sign, UnitSize};
    use crate::variable::{SizeConstraint, TreeBuilder};

    fn parse_all(tree: &VariableTree, root: VariableId, bytes: &[u8]) -> Vec<ParsingPath> {
        VariableParser::new(tree)
            .parse(root, &BitBuffer::from_bytes(bytes), &Memory::new())
            .expect("parse")
    }

    #[test]
    fn open_leaf_prefers_longest_window() {
        let mut b = TreeBuilder::new();
        let head = b.leaf("head", Leaf::new(DataType::Ascii, SizeConstraint::bytes_range(1, Some(3))));
        let tail = b.leaf("tail", Leaf::new(DataType::Ascii, SizeConstraint::bytes_range(1, Some(3))));
        let root = b.aggregate("msg", vec![head, tail]);
        let tree = b.build().expect("tree");
        let paths = parse_all(&tree, root, b"abcd");
        let splits: Vec<usize> = paths.iter().map(|p| p.span_of(head).expect("bound").len / 8).collect();
        assert_eq!(splits, vec![3, 2, 1]);
    }

    #[test]
    fn constant_leaf_matches_exactly() {
        let mut b = TreeBuilder::new();
        let magic = b.leaf("magic", Leaf::fixed(DataType::Raw, BitBuffer::from_bytes(&[0xCA, 0xFE])));
        let tree = b.build().expect("tree");
        assert_eq!(parse_all(&tree, magic, &[0xCA, 0xFE]).len(), 1);
        assert!(parse_all(&tree, magic, &[0xCA, 0xFF]).is_empty());
    }

    #[test]
    fn repeat_with_delimiter() {
        let mut b = TreeBuilder::new();
        let item = b.leaf("item", Leaf::new(DataType::DecimalWord, SizeConstraint::bytes(1)));
        let list = b.repeat(
            "list",
            Repeat::new(item, 1, None).with_delimiter(BitBuffer::from_bytes(b",")),
        );
        let tree = b.build().expect("tree");
        let paths = parse_all(&tree, list, b"1,2,3");
        assert_eq!(paths.len(), 1);
        assert!(parse_all(&tree, list, b"1,2,").is_empty());
    }

    #[test]
    fn forward_size_relation_pins_payload_length() {
        let mut b = TreeBuilder::new();
        let len = b.relation("len", Relation::size(vec![]));
        let payload = b.leaf("payload", Leaf::new(DataType::Raw, SizeConstraint::unbounded()));
        let trailer = b.leaf("trailer", Leaf::new(DataType::Raw, SizeConstraint::unbounded()));
        b.set_targets(len, vec![payload]);
        let root = b.aggregate("msg", vec![len, payload, trailer]);
        let tree = b.build().expect("tree");
        let paths = parse_all(&tree, root, &[0x02, 0xAA, 0xBB, 0xCC]);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].value_of(payload).expect("payload").to_hex(), "aabb");
        assert_eq!(paths[0].value_of(trailer).expect("trailer").to_hex(), "cc");
    }

    #[test]
    fn oversized_length_prefix_yields_no_path() {
        let mut b = TreeBuilder::new();
        let len = b.relation(
            "len",
            Relation::size_with(vec![], IntegerFormat::new(UnitSize::U64, Endianness::Big, Sign::Unsigned), 8, 0),
        );
        let payload = b.leaf("payload", Leaf::new(DataType::Raw, SizeConstraint::unbounded()));
        b.set_targets(len, vec![payload]);
        let root = b.aggregate("msg", vec![len, payload]);
        let tree = b.build().expect("tree");
        let input = [0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xAA];
        assert!(parse_all(&tree, root, &input).is_empty());
    }

    #[test]
    fn size_below_its_offset_yields_no_path() {
        let mut b = TreeBuilder::new();
        let len = b.relation("len", Relation::size_with(vec![], IntegerFormat::uint8(), 8, 2));
        let payload = b.leaf("payload", Leaf::new(DataType::Raw, SizeConstraint::unbounded()));
        b.set_targets(len, vec![payload]);
        let root = b.aggregate("msg", vec![len, payload]);
        let tree = b.build().expect("tree");
        assert!(parse_all(&tree, root, &[0x01, 0xAA]).is_empty());
        assert_eq!(parse_all(&tree, root, &[0x03, 0xAA]).len(), 1);
    }

    #[test]
    fn unknown_root_is_a_specification_error() {
        let tree = TreeBuilder::new().build().expect("tree");
        let err = VariableParser::new(&tree)
            .parse(VariableId::new(), &BitBuffer::new(), &Memory::new())
            .unwrap_err();
        assert!(matches!(err, DomainError::Specification(_)));
    }
}
