//! Variable tree: the field specification both engines walk.
//!
//! Nodes live in an arena keyed by [`VariableId`]. Children and relation targets are id
//! lists, so a relation pointing at a sibling or an ancestor is a plain graph edge. The
//! only way to obtain a [`VariableTree`] is [`TreeBuilder::build`], which rejects
//! dangling references, shared children, structural cycles, contradictory bounds and
//! cyclic relation dependencies.

use crate::bits::BitBuffer;
use crate::digest::{ChecksumAlgorithm, HashAlgorithm, HmacAlgorithm};
use crate::error::SpecificationError;
use crate::types::{DataType, IntegerFormat, UnitSize};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableId(Uuid);

impl VariableId {
    pub fn new() -> Self {
        VariableId(Uuid::new_v4())
    }
}

impl Default for VariableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a leaf does with its value and the session memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Svas {
    /// Value fixed by the description (or memory); never learned.
    Constant,
    /// Free value, memorized each time it is parsed or generated.
    Ephemeral,
    /// Free value, never memorized.
    Volatile,
    /// Once memorized, every later message must carry the memorized value.
    Persistent,
}

/// How a persistent leaf reuses its memorized value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recall {
    #[default]
    Reuse,
    Increment,
}

/// Size bounds in bits. `max == None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeConstraint {
    pub min: usize,
    pub max: Option<usize>,
}

impl SizeConstraint {
    pub fn bits(n: usize) -> Self {
        SizeConstraint { min: n, max: Some(n) }
    }

    pub fn bytes(n: usize) -> Self {
        Self::bits(n * 8)
    }

    pub fn bits_range(min: usize, max: Option<usize>) -> Self {
        SizeConstraint { min, max }
    }

    pub fn bytes_range(min: usize, max: Option<usize>) -> Self {
        SizeConstraint {
            min: min * 8,
            max: max.map(|m| m * 8),
        }
    }

    pub fn unbounded() -> Self {
        SizeConstraint { min: 0, max: None }
    }

    pub fn contains(&self, len: usize) -> bool {
        len >= self.min && self.max.map_or(true, |m| len <= m)
    }

    pub fn exact(&self) -> Option<usize> {
        match self.max {
            Some(max) if max == self.min => Some(max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub data_type: DataType,
    pub size: SizeConstraint,
    /// Fixed value, if the description carries one.
    pub value: Option<BitBuffer>,
}

impl Leaf {
    pub fn new(data_type: DataType, size: SizeConstraint) -> Self {
        Leaf {
            data_type,
            size,
            value: None,
        }
    }

    /// Sized by the type alone (integers, IPv4, enums) or unconstrained.
    pub fn of_type(data_type: DataType) -> Self {
        let size = match data_type.natural_size() {
            Some((min, max)) => SizeConstraint::bits_range(min, Some(max)),
            None => SizeConstraint::unbounded(),
        };
        Self::new(data_type, size)
    }

    pub fn fixed(data_type: DataType, value: BitBuffer) -> Self {
        Leaf {
            data_type,
            size: SizeConstraint::bits(value.len()),
            value: Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repeat {
    pub child: VariableId,
    pub min: usize,
    pub max: Option<usize>,
    /// Emitted (and expected) between two repetitions.
    pub delimiter: Option<BitBuffer>,
}

impl Repeat {
    pub fn new(child: VariableId, min: usize, max: Option<usize>) -> Self {
        Repeat {
            child,
            min,
            max,
            delimiter: None,
        }
    }

    pub fn optional(child: VariableId) -> Self {
        Self::new(child, 0, Some(1))
    }

    pub fn with_delimiter(mut self, delimiter: BitBuffer) -> Self {
        self.delimiter = Some(delimiter);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// `floor(target bits / unit_bits) + offset`, encoded as `format`.
    Size {
        unit_bits: usize,
        offset: i64,
        format: IntegerFormat,
    },
    /// Copy of the targets' bits.
    Value,
    Hash(HashAlgorithm),
    Hmac {
        algorithm: HmacAlgorithm,
        key: Vec<u8>,
    },
    Checksum {
        algorithm: ChecksumAlgorithm,
        format: IntegerFormat,
    },
    /// `fill` repeated until the targets plus `offset` reach a multiple of `modulo_bits`.
    /// With `once`, targets already longer than one modulo get no padding.
    Padding {
        modulo_bits: usize,
        offset: i64,
        once: bool,
        fill: BitBuffer,
    },
}

/// Padding length, in bits, after `total` bits of targets.
pub fn padding_bits(total: usize, modulo_bits: usize, offset: i64, once: bool) -> usize {
    if modulo_bits == 0 {
        return 0;
    }
    let size = total as i128 + i128::from(offset);
    let modulo = modulo_bits as i128;
    if once && size > modulo {
        return 0;
    }
    match size.rem_euclid(modulo) {
        0 => 0,
        rem => (modulo - rem) as usize,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub kind: RelationKind,
    pub targets: Vec<VariableId>,
}

impl Relation {
    pub fn size(targets: Vec<VariableId>) -> Self {
        Self::size_with(targets, IntegerFormat::uint8(), 8, 0)
    }

    pub fn size_with(targets: Vec<VariableId>, format: IntegerFormat, unit_bits: usize, offset: i64) -> Self {
        Relation {
            kind: RelationKind::Size {
                unit_bits,
                offset,
                format,
            },
            targets,
        }
    }

    pub fn value(targets: Vec<VariableId>) -> Self {
        Relation {
            kind: RelationKind::Value,
            targets,
        }
    }

    pub fn hash(algorithm: HashAlgorithm, targets: Vec<VariableId>) -> Self {
        Relation {
            kind: RelationKind::Hash(algorithm),
            targets,
        }
    }

    pub fn hmac(algorithm: HmacAlgorithm, key: Vec<u8>, targets: Vec<VariableId>) -> Self {
        Relation {
            kind: RelationKind::Hmac { algorithm, key },
            targets,
        }
    }

    /// Checksum encoded as a big-endian unsigned integer of the algorithm's width.
    pub fn checksum(algorithm: ChecksumAlgorithm, targets: Vec<VariableId>) -> Self {
        let unit = UnitSize::from_bits(algorithm.width_bits()).unwrap_or(UnitSize::U16);
        let format = IntegerFormat::new(unit, Default::default(), Default::default());
        Self::checksum_with(algorithm, format, targets)
    }

    pub fn checksum_with(algorithm: ChecksumAlgorithm, format: IntegerFormat, targets: Vec<VariableId>) -> Self {
        Relation {
            kind: RelationKind::Checksum { algorithm, format },
            targets,
        }
    }

    /// Zero-byte padding aligning the targets to `modulo_bits`.
    pub fn padding(modulo_bits: usize, targets: Vec<VariableId>) -> Self {
        Self::padding_with(modulo_bits, 0, false, BitBuffer::from_bytes(&[0]), targets)
    }

    pub fn padding_with(
        modulo_bits: usize,
        offset: i64,
        once: bool,
        fill: BitBuffer,
        targets: Vec<VariableId>,
    ) -> Self {
        Relation {
            kind: RelationKind::Padding {
                modulo_bits,
                offset,
                once,
                fill,
            },
            targets,
        }
    }

    /// Width of the computed value when it does not depend on the targets.
    pub fn fixed_width(&self) -> Option<usize> {
        match &self.kind {
            RelationKind::Size { format, .. } | RelationKind::Checksum { format, .. } => Some(format.unit.bits()),
            RelationKind::Hash(algorithm) => Some(algorithm.output_bits()),
            RelationKind::Hmac { algorithm, .. } => Some(algorithm.output_bits()),
            RelationKind::Value | RelationKind::Padding { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Leaf(Leaf),
    Aggregate(Vec<VariableId>),
    Alternative(Vec<VariableId>),
    Repeat(Repeat),
    Relation(Relation),
}

impl NodeKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Leaf(_) => "leaf",
            NodeKind::Aggregate(_) => "agg",
            NodeKind::Alternative(_) => "alt",
            NodeKind::Repeat(_) => "repeat",
            NodeKind::Relation(_) => "relation",
        }
    }

    pub fn children(&self) -> Vec<VariableId> {
        match self {
            NodeKind::Aggregate(children) | NodeKind::Alternative(children) => children.clone(),
            NodeKind::Repeat(repeat) => vec![repeat.child],
            NodeKind::Leaf(_) | NodeKind::Relation(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub id: VariableId,
    pub name: Option<String>,
    pub svas: Svas,
    pub recall: Recall,
    pub kind: NodeKind,
}

impl Variable {
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}#{}", self.kind.kind_name(), &self.id.to_string()[..8]),
        }
    }
}

/// Validated arena of variables.
#[derive(Debug, Clone)]
pub struct VariableTree {
    nodes: HashMap<VariableId, Variable>,
    order: Vec<VariableId>,
    parents: HashMap<VariableId, VariableId>,
    /// Leaf or node -> size relations that list it as a target.
    size_relations: HashMap<VariableId, Vec<VariableId>>,
}

impl VariableTree {
    pub fn get(&self, id: VariableId) -> Option<&Variable> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: VariableId) -> Result<&Variable, SpecificationError> {
        self.nodes.get(&id).ok_or(SpecificationError::UnknownNode(id))
    }

    /// Variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.order.iter().filter_map(move |id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn parent(&self, id: VariableId) -> Option<VariableId> {
        self.parents.get(&id).copied()
    }

    /// Nodes without a parent, in insertion order.
    pub fn roots(&self) -> Vec<VariableId> {
        self.order
            .iter()
            .copied()
            .filter(|id| !self.parents.contains_key(id))
            .collect()
    }

    /// First variable carrying `name`.
    pub fn find(&self, name: &str) -> Option<VariableId> {
        self.iter().find(|v| v.name.as_deref() == Some(name)).map(|v| v.id)
    }

    /// First variable named `name` inside the subtree of `root`.
    pub fn find_within(&self, root: VariableId, name: &str) -> Option<VariableId> {
        self.iter()
            .find(|v| v.name.as_deref() == Some(name) && self.contains(root, v.id))
            .map(|v| v.id)
    }

    pub fn name_of(&self, id: VariableId) -> String {
        self.nodes
            .get(&id)
            .map(Variable::display_name)
            .unwrap_or_else(|| id.to_string())
    }

    /// True when `inner` is `outer` or one of its descendants.
    pub fn contains(&self, outer: VariableId, inner: VariableId) -> bool {
        let mut current = Some(inner);
        while let Some(id) = current {
            if id == outer {
                return true;
            }
            current = self.parents.get(&id).copied();
        }
        false
    }

    /// Size relations that list `id` as a direct target.
    pub fn size_relations_of(&self, id: VariableId) -> &[VariableId] {
        self.size_relations.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Width in bits when it is the same for every message.
    pub fn static_width(&self, id: VariableId) -> Option<usize> {
        let var = self.nodes.get(&id)?;
        match &var.kind {
            NodeKind::Leaf(leaf) => match &leaf.value {
                Some(value) => Some(value.len()),
                None => leaf.size.exact(),
            },
            NodeKind::Aggregate(children) => children.iter().map(|c| self.static_width(*c)).sum(),
            NodeKind::Alternative(children) => {
                let mut widths = children.iter().map(|c| self.static_width(*c));
                let first = widths.next()??;
                for w in widths {
                    if w? != first {
                        return None;
                    }
                }
                Some(first)
            }
            NodeKind::Repeat(repeat) => {
                let count = match repeat.max {
                    Some(max) if max == repeat.min => max,
                    _ => return None,
                };
                let child = self.static_width(repeat.child)?;
                let delimiter = repeat.delimiter.as_ref().map_or(0, BitBuffer::len);
                Some(count * child + count.saturating_sub(1) * delimiter)
            }
            NodeKind::Relation(relation) => {
                if let Some(width) = relation.fixed_width() {
                    return Some(width);
                }
                let targets: usize = relation.targets.iter().map(|t| self.static_width(*t)).sum::<Option<usize>>()?;
                match &relation.kind {
                    RelationKind::Padding {
                        modulo_bits,
                        offset,
                        once,
                        ..
                    } => Some(padding_bits(targets, *modulo_bits, *offset, *once)),
                    _ => Some(targets),
                }
            }
        }
    }

    /// Relation nodes inside the subtree of `id` (including `id`).
    pub fn relations_within(&self, id: VariableId) -> Vec<VariableId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(var) = self.nodes.get(&current) {
                if matches!(var.kind, NodeKind::Relation(_)) {
                    out.push(current);
                }
                stack.extend(var.kind.children());
            }
        }
        out
    }
}

/// Collects variables, then validates them into a [`VariableTree`].
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<Variable>,
}

fn non_empty(name: &str) -> Option<String> {
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with the default SVAS: constant for leaves with a fixed value,
    /// ephemeral otherwise. An empty name leaves the node anonymous.
    pub fn add(&mut self, name: &str, kind: NodeKind) -> VariableId {
        let svas = match &kind {
            NodeKind::Leaf(Leaf { value: Some(_), .. }) => Svas::Constant,
            _ => Svas::Ephemeral,
        };
        let id = VariableId::new();
        self.nodes.push(Variable {
            id,
            name: non_empty(name),
            svas,
            recall: Recall::default(),
            kind,
        });
        id
    }

    pub fn leaf(&mut self, name: &str, leaf: Leaf) -> VariableId {
        self.add(name, NodeKind::Leaf(leaf))
    }

    pub fn aggregate(&mut self, name: &str, children: Vec<VariableId>) -> VariableId {
        self.add(name, NodeKind::Aggregate(children))
    }

    pub fn alternative(&mut self, name: &str, children: Vec<VariableId>) -> VariableId {
        self.add(name, NodeKind::Alternative(children))
    }

    pub fn repeat(&mut self, name: &str, repeat: Repeat) -> VariableId {
        self.add(name, NodeKind::Repeat(repeat))
    }

    pub fn optional(&mut self, name: &str, child: VariableId) -> VariableId {
        self.repeat(name, Repeat::optional(child))
    }

    pub fn relation(&mut self, name: &str, relation: Relation) -> VariableId {
        self.add(name, NodeKind::Relation(relation))
    }

    fn variable_mut(&mut self, id: VariableId) -> Option<&mut Variable> {
        self.nodes.iter_mut().find(|v| v.id == id)
    }

    pub fn set_svas(&mut self, id: VariableId, svas: Svas) -> &mut Self {
        if let Some(var) = self.variable_mut(id) {
            var.svas = svas;
        }
        self
    }

    pub fn set_recall(&mut self, id: VariableId, recall: Recall) -> &mut Self {
        if let Some(var) = self.variable_mut(id) {
            var.recall = recall;
        }
        self
    }

    /// Replace the targets of a relation added before its targets existed.
    pub fn set_targets(&mut self, id: VariableId, targets: Vec<VariableId>) -> &mut Self {
        if let Some(Variable {
            kind: NodeKind::Relation(relation),
            ..
        }) = self.variable_mut(id)
        {
            relation.targets = targets;
        }
        self
    }

    pub fn build(self) -> Result<VariableTree, SpecificationError> {
        let order: Vec<VariableId> = self.nodes.iter().map(|v| v.id).collect();
        let nodes: HashMap<VariableId, Variable> = self.nodes.into_iter().map(|v| (v.id, v)).collect();

        let mut parents = HashMap::new();
        for id in &order {
            let var = &nodes[id];
            for child in var.kind.children() {
                if !nodes.contains_key(&child) {
                    return Err(SpecificationError::UnknownReference {
                        from: var.display_name(),
                        target: child,
                    });
                }
                if child == *id {
                    return Err(SpecificationError::Cycle(var.display_name()));
                }
                if parents.insert(child, *id).is_some() {
                    return Err(SpecificationError::SharedChild(nodes[&child].display_name()));
                }
            }
        }

        // With at most one parent per node, a structural cycle is a parent chain that loops.
        for id in &order {
            let mut seen = HashSet::new();
            let mut current = *id;
            while let Some(parent) = parents.get(&current) {
                if !seen.insert(*parent) {
                    return Err(SpecificationError::Cycle(nodes[parent].display_name()));
                }
                current = *parent;
            }
        }

        let mut size_relations: HashMap<VariableId, Vec<VariableId>> = HashMap::new();
        for id in &order {
            let var = &nodes[id];
            let name = var.display_name();
            match &var.kind {
                NodeKind::Leaf(leaf) => {
                    if let Some(max) = leaf.size.max {
                        if leaf.size.min > max {
                            return Err(SpecificationError::ContradictoryBounds {
                                node: name,
                                min: leaf.size.min,
                                max,
                            });
                        }
                    }
                    if let Some(value) = &leaf.value {
                        if !leaf.size.contains(value.len()) {
                            return Err(SpecificationError::FixedValueOutOfBounds {
                                node: name,
                                len: value.len(),
                            });
                        }
                    }
                }
                NodeKind::Repeat(repeat) => {
                    if let Some(max) = repeat.max {
                        if repeat.min > max {
                            return Err(SpecificationError::ContradictoryBounds {
                                node: name,
                                min: repeat.min,
                                max,
                            });
                        }
                    }
                }
                NodeKind::Relation(relation) => {
                    if relation.targets.is_empty() {
                        return Err(SpecificationError::EmptyRelation(name));
                    }
                    for target in &relation.targets {
                        if !nodes.contains_key(target) {
                            return Err(SpecificationError::UnknownReference {
                                from: name,
                                target: *target,
                            });
                        }
                        if target == id {
                            return Err(SpecificationError::InvalidRelation {
                                node: name,
                                reason: "relation targets itself".to_string(),
                            });
                        }
                        let mut ancestor = parents.get(id);
                        while let Some(a) = ancestor {
                            if a == target && relation.fixed_width().is_none() {
                                return Err(SpecificationError::InvalidRelation {
                                    node: name,
                                    reason: "a variable-width relation cannot cover itself".to_string(),
                                });
                            }
                            ancestor = parents.get(a);
                        }
                    }
                    if let RelationKind::Padding { modulo_bits, fill, .. } = &relation.kind {
                        if *modulo_bits == 0 || fill.is_empty() {
                            return Err(SpecificationError::InvalidRelation {
                                node: name,
                                reason: "padding needs a non-zero modulo and a fill value".to_string(),
                            });
                        }
                    }
                    if let RelationKind::Size { unit_bits, .. } = &relation.kind {
                        if *unit_bits == 0 {
                            return Err(SpecificationError::InvalidRelation {
                                node: name,
                                reason: "size unit must be at least one bit".to_string(),
                            });
                        }
                        for target in &relation.targets {
                            size_relations.entry(*target).or_default().push(*id);
                        }
                    }
                }
                NodeKind::Aggregate(_) | NodeKind::Alternative(_) => {}
            }
        }

        let tree = VariableTree {
            nodes,
            order,
            parents,
            size_relations,
        };
        tree.check_relation_dependencies()?;
        Ok(tree)
    }
}

impl VariableTree {
    /// A relation depends on every other relation found inside its targets. That graph
    /// must be acyclic or resolution could never make progress.
    fn check_relation_dependencies(&self) -> Result<(), SpecificationError> {
        let mut deps: HashMap<VariableId, Vec<VariableId>> = HashMap::new();
        for var in self.iter() {
            if let NodeKind::Relation(relation) = &var.kind {
                let mut edges = Vec::new();
                for target in &relation.targets {
                    edges.extend(self.relations_within(*target).into_iter().filter(|r| *r != var.id));
                }
                deps.insert(var.id, edges);
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        fn visit(
            id: VariableId,
            deps: &HashMap<VariableId, Vec<VariableId>>,
            marks: &mut HashMap<VariableId, Mark>,
        ) -> Option<VariableId> {
            match marks.get(&id) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => return Some(id),
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            for next in deps.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(culprit) = visit(*next, deps, marks) {
                    return Some(culprit);
                }
            }
            marks.insert(id, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        for var in self.iter() {
            if deps.contains_key(&var.id) {
                if let Some(culprit) = visit(var.id, &deps, &mut marks) {
                    return Err(SpecificationError::CyclicRelation(self.name_of(culprit)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(n: usize) -> Leaf {
        Leaf::new(DataType::Raw, SizeConstraint::bytes(n))
    }

    #[test]
    fn default_svas_follows_fixed_value() {
        let mut b = TreeBuilder::new();
        let fixed = b.leaf("magic", Leaf::fixed(DataType::Raw, BitBuffer::from_bytes(&[0xCA, 0xFE])));
        let free = b.leaf("body", raw(2));
        let root = b.aggregate("msg", vec![fixed, free]);
        let tree = b.build().expect("tree");
        assert_eq!(tree.node(fixed).expect("node").svas, Svas::Constant);
        assert_eq!(tree.node(free).expect("node").svas, Svas::Ephemeral);
        assert_eq!(tree.roots(), vec![root]);
        assert_eq!(tree.static_width(root), Some(32));
        assert!(tree.contains(root, free));
        assert!(!tree.contains(free, root));
    }

    #[test]
    fn rejects_contradictory_bounds() {
        let mut b = TreeBuilder::new();
        b.leaf("bad", Leaf::new(DataType::Raw, SizeConstraint::bytes_range(4, Some(2))));
        assert!(matches!(b.build(), Err(SpecificationError::ContradictoryBounds { .. })));
    }

    #[test]
    fn rejects_dangling_relation_target() {
        let mut b = TreeBuilder::new();
        b.relation("len", Relation::size(vec![VariableId::new()]));
        assert!(matches!(b.build(), Err(SpecificationError::UnknownReference { .. })));
    }

    #[test]
    fn rejects_shared_child() {
        let mut b = TreeBuilder::new();
        let leaf = b.leaf("x", raw(1));
        b.aggregate("a", vec![leaf]);
        b.aggregate("b", vec![leaf]);
        assert!(matches!(b.build(), Err(SpecificationError::SharedChild(_))));
    }

    #[test]
    fn padding_width_follows_static_targets() {
        let mut b = TreeBuilder::new();
        let body = b.leaf("body", raw(12));
        let pad = b.relation("pad", Relation::padding(128, vec![body]));
        let root = b.aggregate("msg", vec![body, pad]);
        let tree = b.build().expect("tree");
        assert_eq!(tree.static_width(pad), Some(32));
        assert_eq!(tree.static_width(root), Some(128));
        assert_eq!(padding_bits(96, 128, 8, false), 24);
        assert_eq!(padding_bits(200, 128, 0, true), 0);
        assert_eq!(padding_bits(128, 128, 0, false), 0);
    }

    #[test]
    fn rejects_zero_padding_modulo() {
        let mut b = TreeBuilder::new();
        let body = b.leaf("body", raw(1));
        let pad = b.relation("pad", Relation::padding(0, vec![body]));
        b.aggregate("msg", vec![body, pad]);
        assert!(matches!(b.build(), Err(SpecificationError::InvalidRelation { .. })));
    }

    #[test]
    fn rejects_cyclic_relations() {
        let mut b = TreeBuilder::new();
        let a = b.relation("a", Relation::value(vec![]));
        let c = b.relation("c", Relation::value(vec![a]));
        b.set_targets(a, vec![c]);
        b.aggregate("msg", vec![a, c]);
        assert!(matches!(b.build(), Err(SpecificationError::CyclicRelation(_))));
    }

    #[test]
    fn relation_inside_its_own_target_is_allowed() {
        let mut b = TreeBuilder::new();
        let kind = b.leaf("type", raw(1));
        let sum = b.relation("checksum", Relation::checksum(ChecksumAlgorithm::Internet, vec![]));
        let header = b.aggregate("header", vec![kind, sum]);
        b.set_targets(sum, vec![header]);
        let tree = b.build().expect("tree");
        assert_eq!(tree.relations_within(header), vec![sum]);
    }
}
