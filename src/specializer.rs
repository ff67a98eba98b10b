//! Variable specializer: tree -> bits.
//!
//! Mirror of the parser. Leaves pick a value (forced, memorized, fixed or generated),
//! alternatives and repeats choose according to the configured strategies, and
//! relations that precede their targets emit a zeroed placeholder which is patched once
//! the targets exist.

use crate::bits::BitBuffer;
use crate::budget::Budget;
use crate::config::{AlternativeStrategy, EngineConfig, RepeatStrategy};
use crate::error::{DomainError, SpecializationError};
use crate::memory::Memory;
use crate::path::{GenericPath, PathState, Span, SpecializingPath};
use crate::relation::{Computed, Direction, RelationScope};
use crate::value::Value;
use crate::variable::{Leaf, NodeKind, Recall, Relation, Repeat, Svas, Variable, VariableId, VariableTree};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Per-call inputs: forced values, repeat counts and the generation seed.
#[derive(Debug, Clone, Default)]
pub struct SpecializeOptions {
    forced: HashMap<VariableId, BitBuffer>,
    repeat_counts: HashMap<VariableId, usize>,
    seed: Option<u64>,
}

impl SpecializeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `bits` for `id` as is. On a relation this bypasses the computation.
    pub fn force(mut self, id: VariableId, bits: BitBuffer) -> Self {
        self.forced.insert(id, bits);
        self
    }

    /// Force a typed value, encoded with the leaf's own type.
    pub fn force_value(self, tree: &VariableTree, id: VariableId, value: &Value) -> Result<Self, DomainError> {
        let var = tree.node(id)?;
        let NodeKind::Leaf(leaf) = &var.kind else {
            return Err(SpecializationError::InvalidForcedValue {
                node: var.display_name(),
                reason: "only leaves take typed values".to_string(),
            }
            .into());
        };
        let bits = leaf.data_type.encode(value).map_err(|e| SpecializationError::InvalidForcedValue {
            node: var.display_name(),
            reason: e.to_string(),
        })?;
        if !leaf.size.contains(bits.len()) {
            return Err(SpecializationError::InvalidForcedValue {
                node: var.display_name(),
                reason: format!("{} bits is outside the leaf's size", bits.len()),
            }
            .into());
        }
        Ok(self.force(id, bits))
    }

    pub fn repeat_count(mut self, id: VariableId, count: usize) -> Self {
        self.repeat_counts.insert(id, count);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

pub struct VariableSpecializer<'t> {
    tree: &'t VariableTree,
    config: EngineConfig,
}

impl<'t> VariableSpecializer<'t> {
    pub fn new(tree: &'t VariableTree) -> Self {
        Self::with_config(tree, EngineConfig::default())
    }

    pub fn with_config(tree: &'t VariableTree, config: EngineConfig) -> Self {
        VariableSpecializer { tree, config }
    }

    /// One message; its memory writes are committed into `memory`.
    pub fn specialize(&self, root: VariableId, memory: &mut Memory) -> Result<SpecializingPath, DomainError> {
        self.specialize_with(root, memory, &SpecializeOptions::default())
    }

    pub fn specialize_with(
        &self,
        root: VariableId,
        memory: &mut Memory,
        options: &SpecializeOptions,
    ) -> Result<SpecializingPath, DomainError> {
        let paths = self.specialize_all(root, memory, options)?;
        let path = paths
            .into_iter()
            .next()
            .ok_or_else(|| SpecializationError::Exhausted(self.tree.name_of(root)))?;
        memory.commit(path.memory());
        Ok(path)
    }

    /// Up to `max_specialized_paths` complete messages. `memory` is left untouched.
    pub fn specialize_all(
        &self,
        root: VariableId,
        memory: &Memory,
        options: &SpecializeOptions,
    ) -> Result<Vec<SpecializingPath>, DomainError> {
        self.tree.node(root)?;
        let rng = match options.seed.or(self.config.seed) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut run = SpecializeRun {
            scope: RelationScope::new(self.tree, root),
            config: &self.config,
            options,
            budget: Budget::new(self.config.specialize_budget),
            rng,
            last_failure: None,
        };
        let paths = run.specialize_node(root, SpecializingPath::new(memory))?;

        let mut unresolved = None;
        let complete: Vec<SpecializingPath> = paths
            .into_iter()
            .filter_map(|mut path| {
                if let Some(relation) = path.pending().first() {
                    unresolved.get_or_insert(*relation);
                    return None;
                }
                path.set_state(PathState::Complete);
                Some(path)
            })
            .collect();
        debug!(
            root = %self.tree.name_of(root),
            results = complete.len(),
            steps = run.budget.used(),
            "specialize finished"
        );
        if complete.is_empty() {
            let error = match unresolved {
                Some(relation) => SpecializationError::UnresolvedRelation(self.tree.name_of(relation)),
                None => run
                    .last_failure
                    .unwrap_or_else(|| SpecializationError::Exhausted(self.tree.name_of(root))),
            };
            return Err(error.into());
        }
        Ok(complete)
    }
}

struct SpecializeRun<'t, 'o> {
    scope: RelationScope<'t>,
    config: &'t EngineConfig,
    options: &'o SpecializeOptions,
    budget: Budget,
    rng: StdRng,
    last_failure: Option<SpecializationError>,
}

impl<'t, 'o> SpecializeRun<'t, 'o> {
    fn specialize_node(
        &mut self,
        id: VariableId,
        path: SpecializingPath,
    ) -> Result<Vec<SpecializingPath>, DomainError> {
        self.budget.step()?;
        let tree = self.scope.tree;
        let var = tree.node(id)?;
        let start = path.position();
        let results = match &var.kind {
            NodeKind::Leaf(leaf) => self.specialize_leaf(var, leaf, path)?,
            NodeKind::Aggregate(children) => self.specialize_aggregate(children, path)?,
            NodeKind::Alternative(children) => self.specialize_alternative(children, path)?,
            NodeKind::Repeat(repeat) => self.specialize_repeat(var, repeat, path)?,
            NodeKind::Relation(relation) => self.specialize_relation(var, relation, path)?,
        };
        let binds_itself = matches!(var.kind, NodeKind::Leaf(_) | NodeKind::Relation(_));
        let mut out = Vec::with_capacity(results.len());
        for mut path in results {
            if !binds_itself {
                let len = path.position() - start;
                path.bind(id, Span::new(start, len));
            }
            if path.pending().is_empty() {
                out.push(path);
                continue;
            }
            match self.scope.resolve_pending(&mut path, Direction::Specialize) {
                Ok(()) => out.push(path),
                Err(relation) => {
                    self.last_failure = Some(SpecializationError::UnresolvedRelation(tree.name_of(relation)));
                }
            }
        }
        out.truncate(self.config.max_specialized_paths.max(1));
        Ok(out)
    }

    fn specialize_leaf(
        &mut self,
        var: &Variable,
        leaf: &Leaf,
        mut path: SpecializingPath,
    ) -> Result<Vec<SpecializingPath>, DomainError> {
        let bits = match self.options.forced.get(&var.id) {
            Some(forced) => Some(forced.clone()),
            None => match var.svas {
                Svas::Constant => path.memory().get(var.id).or_else(|| leaf.value.clone()),
                Svas::Persistent => match path.memory().get(var.id) {
                    Some(last) => match var.recall {
                        Recall::Reuse => Some(last),
                        Recall::Increment => leaf.data_type.increment(&last).ok(),
                    },
                    None => Some(self.generate(leaf)),
                },
                Svas::Ephemeral | Svas::Volatile => Some(self.generate(leaf)),
            },
        };
        let Some(bits) = bits else {
            trace!(leaf = %var.display_name(), "no value to emit");
            self.last_failure = Some(SpecializationError::NoValue(var.display_name()));
            return Ok(Vec::new());
        };
        let span = path.emit(&bits);
        path.bind(var.id, span);
        if matches!(var.svas, Svas::Ephemeral | Svas::Persistent) {
            path.memory_mut().memorize(var.id, bits);
        }
        Ok(vec![path])
    }

    /// The fixed value if any, else random bits of a random allowed length.
    fn generate(&mut self, leaf: &Leaf) -> BitBuffer {
        if let Some(value) = &leaf.value {
            return value.clone();
        }
        let step = leaf.data_type.length_step().max(1);
        let ceiling = leaf
            .size
            .max
            .unwrap_or_else(|| self.config.max_generation_bits())
            .max(leaf.size.min);
        let low = leaf.size.min.div_ceil(step);
        let high = ceiling / step;
        let units = if high <= low { low } else { self.rng.gen_range(low..=high) };
        leaf.data_type.generate(units * step, &mut self.rng)
    }

    fn specialize_aggregate(
        &mut self,
        children: &[VariableId],
        path: SpecializingPath,
    ) -> Result<Vec<SpecializingPath>, DomainError> {
        let mut frontier = vec![path];
        for child in children {
            let mut next = Vec::new();
            for path in frontier {
                next.extend(self.specialize_node(*child, path)?);
            }
            if next.is_empty() {
                return Ok(next);
            }
            frontier = next;
        }
        Ok(frontier)
    }

    fn specialize_alternative(
        &mut self,
        children: &[VariableId],
        path: SpecializingPath,
    ) -> Result<Vec<SpecializingPath>, DomainError> {
        let mut order = children.to_vec();
        match self.config.alternative_strategy {
            AlternativeStrategy::All => {
                let mut out = Vec::new();
                for child in order {
                    out.extend(self.specialize_node(child, path.clone())?);
                }
                Ok(out)
            }
            AlternativeStrategy::First | AlternativeStrategy::Random => {
                if self.config.alternative_strategy == AlternativeStrategy::Random {
                    order.shuffle(&mut self.rng);
                }
                for child in order {
                    let out = self.specialize_node(child, path.clone())?;
                    if !out.is_empty() {
                        return Ok(out);
                    }
                }
                Ok(Vec::new())
            }
        }
    }

    fn repeat_count(&mut self, var: &Variable, repeat: &Repeat) -> Result<usize, DomainError> {
        let max = repeat.max.unwrap_or_else(|| self.config.max_repeat.max(repeat.min));
        if let Some(count) = self.options.repeat_counts.get(&var.id) {
            if *count < repeat.min || *count > max {
                return Err(SpecializationError::InvalidForcedValue {
                    node: var.display_name(),
                    reason: format!("{} repetitions outside {}..={}", count, repeat.min, max),
                }
                .into());
            }
            return Ok(*count);
        }
        Ok(match self.config.repeat_strategy {
            RepeatStrategy::Min => repeat.min,
            RepeatStrategy::Max => max,
            RepeatStrategy::Random => self.rng.gen_range(repeat.min..=max),
        })
    }

    fn specialize_repeat(
        &mut self,
        var: &Variable,
        repeat: &Repeat,
        path: SpecializingPath,
    ) -> Result<Vec<SpecializingPath>, DomainError> {
        let count = self.repeat_count(var, repeat)?;
        let mut frontier = vec![path];
        for i in 0..count {
            let mut next = Vec::new();
            for mut path in frontier {
                if i > 0 {
                    if let Some(delimiter) = &repeat.delimiter {
                        path.emit(delimiter);
                    }
                }
                next.extend(self.specialize_node(repeat.child, path)?);
            }
            if next.is_empty() {
                return Ok(next);
            }
            frontier = next;
        }
        Ok(frontier)
    }

    fn specialize_relation(
        &mut self,
        var: &Variable,
        relation: &Relation,
        mut path: SpecializingPath,
    ) -> Result<Vec<SpecializingPath>, DomainError> {
        if let Some(forced) = self.options.forced.get(&var.id) {
            let span = path.emit(forced);
            path.bind(var.id, span);
            return Ok(vec![path]);
        }
        match self.scope.compute(var.id, &path) {
            Computed::Value(bits) => {
                let span = path.emit(&bits);
                path.bind(var.id, span);
                Ok(vec![path])
            }
            Computed::Failed(reason) => {
                trace!(relation = %var.display_name(), %reason, "relation cannot be computed");
                self.last_failure = Some(SpecializationError::UnresolvedRelation(var.display_name()));
                Ok(Vec::new())
            }
            Computed::NotReady => {
                let width = relation
                    .fixed_width()
                    .or_else(|| self.scope.tree.static_width(var.id))
                    .ok_or_else(|| SpecializationError::UndeterminedWidth(var.display_name()))?;
                let span = path.emit(&BitBuffer::zeros(width));
                path.bind(var.id, span);
                path.register_callback(var.id);
                Ok(vec![path])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::HashAlgorithm;
    use crate::types::{DataType, IntegerFormat};
    use crate::variable::{SizeConstraint, TreeBuilder};

    #[test]
    fn length_prefix_is_patched() {
        let mut b = TreeBuilder::new();
        let len = b.relation("len", Relation::size(vec![]));
        let body = b.leaf("body", Leaf::new(DataType::Ascii, SizeConstraint::bytes(5)));
        b.set_targets(len, vec![body]);
        let root = b.aggregate("msg", vec![len, body]);
        let tree = b.build().expect("tree");
        let mut memory = Memory::new();
        let path = VariableSpecializer::new(&tree)
            .specialize_with(root, &mut memory, &SpecializeOptions::new().seed(1))
            .expect("specialize");
        let bytes = path.into_data().to_bytes();
        assert_eq!(bytes.len(), 6);
        assert_eq!(bytes[0], 5);
    }

    #[test]
    fn forced_value_wins_over_generation() {
        let mut b = TreeBuilder::new();
        let port = b.leaf("port", Leaf::of_type(DataType::Integer(IntegerFormat::uint16be())));
        let tree = b.build().expect("tree");
        let options = SpecializeOptions::new()
            .force_value(&tree, port, &Value::Unsigned(8080))
            .expect("force");
        let path = VariableSpecializer::new(&tree)
            .specialize_with(port, &mut Memory::new(), &options)
            .expect("specialize");
        assert_eq!(path.into_data().to_bytes(), vec![0x1F, 0x90]);
    }

    #[test]
    fn value_relation_of_unknown_width_is_fatal() {
        let mut b = TreeBuilder::new();
        let copy = b.relation("copy", Relation::value(vec![]));
        let text = b.leaf("text", Leaf::new(DataType::Ascii, SizeConstraint::bytes_range(1, Some(4))));
        b.set_targets(copy, vec![text]);
        let root = b.aggregate("msg", vec![copy, text]);
        let tree = b.build().expect("tree");
        let err = VariableSpecializer::new(&tree)
            .specialize(root, &mut Memory::new())
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Specialization(SpecializationError::UndeterminedWidth(_))
        ));
    }

    #[test]
    fn constant_without_value_reports_the_leaf() {
        let mut b = TreeBuilder::new();
        let leaf = b.leaf("token", Leaf::new(DataType::Raw, SizeConstraint::bytes(4)));
        b.set_svas(leaf, Svas::Constant);
        let tree = b.build().expect("tree");
        let err = VariableSpecializer::new(&tree)
            .specialize(leaf, &mut Memory::new())
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Specialization(SpecializationError::NoValue(ref name)) if name == "token"
        ));
    }

    #[test]
    fn alternative_all_yields_every_branch() {
        let mut b = TreeBuilder::new();
        let a = b.leaf("a", Leaf::fixed(DataType::Raw, BitBuffer::from_bytes(&[1])));
        let c = b.leaf("c", Leaf::fixed(DataType::Raw, BitBuffer::from_bytes(&[2])));
        let alt = b.alternative("choice", vec![a, c]);
        let digest = b.relation("digest", Relation::hash(HashAlgorithm::Sha256, vec![alt]));
        let root = b.aggregate("msg", vec![alt, digest]);
        let tree = b.build().expect("tree");
        let config = EngineConfig {
            alternative_strategy: AlternativeStrategy::All,
            ..EngineConfig::default()
        };
        let paths = VariableSpecializer::with_config(&tree, config)
            .specialize_all(root, &Memory::new(), &SpecializeOptions::new())
            .expect("specialize");
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.data().len() == 8 + 256));
    }
}
