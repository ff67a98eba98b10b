//! Relation values and deferred resolution.
//!
//! A relation is ready once every target inside the current message is bound on the path
//! and holds no other unresolved relation. Targets outside the message (another symbol of
//! the session) are read from memory. When a relation sits inside one of its own targets,
//! the target is read with the relation's span zeroed.

use crate::bits::BitBuffer;
use crate::path::GenericPath;
use crate::types::DataType;
use crate::value::Value;
use crate::variable::{padding_bits, NodeKind, Relation, RelationKind, VariableId, VariableTree};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Verify computed values against the wire.
    Parse,
    /// Patch computed values over placeholders.
    Specialize,
}

/// What bound size relations say about the length of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeHint {
    /// No resolved size relation constrains the leaf.
    Open,
    Exact(usize),
    /// No length can satisfy the declared size.
    Unsatisfiable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Computed {
    NotReady,
    Value(BitBuffer),
    /// The relation can never hold on this path.
    Failed(String),
}

/// Relations are resolved relative to the root being walked.
#[derive(Debug, Clone, Copy)]
pub struct RelationScope<'t> {
    pub tree: &'t VariableTree,
    pub root: VariableId,
}

impl<'t> RelationScope<'t> {
    pub fn new(tree: &'t VariableTree, root: VariableId) -> Self {
        RelationScope { tree, root }
    }

    fn relation(&self, id: VariableId) -> Option<&'t Relation> {
        match &self.tree.get(id)?.kind {
            NodeKind::Relation(relation) => Some(relation),
            _ => None,
        }
    }

    fn in_message(&self, id: VariableId) -> bool {
        self.tree.contains(self.root, id)
    }

    /// Current bits of `target` as seen by `relation_id`.
    fn target_bits<P: GenericPath>(&self, relation_id: VariableId, target: VariableId, path: &P) -> Option<BitBuffer> {
        if !self.in_message(target) {
            return path.memory().get(target);
        }
        let mut bits = path.value_of(target)?;
        if self.tree.contains(target, relation_id) {
            let own = path.span_of(relation_id)?;
            let outer = path.span_of(target)?;
            if own.offset >= outer.offset && own.end() <= outer.end() {
                bits.overwrite(own.offset - outer.offset, &BitBuffer::zeros(own.len));
            }
        }
        Some(bits)
    }

    pub fn is_ready<P: GenericPath>(&self, relation_id: VariableId, path: &P) -> bool {
        let Some(relation) = self.relation(relation_id) else {
            return false;
        };
        relation.targets.iter().all(|target| {
            if !self.in_message(*target) {
                return path.memory().has(*target);
            }
            path.is_bound(*target)
                && !path
                    .pending()
                    .iter()
                    .any(|p| *p != relation_id && self.tree.contains(*target, *p))
        })
    }

    pub fn compute<P: GenericPath>(&self, relation_id: VariableId, path: &P) -> Computed {
        let Some(relation) = self.relation(relation_id) else {
            return Computed::Failed(format!("{} is not a relation", self.tree.name_of(relation_id)));
        };
        if !self.is_ready(relation_id, path) {
            return Computed::NotReady;
        }
        let mut targets = Vec::with_capacity(relation.targets.len());
        for target in &relation.targets {
            match self.target_bits(relation_id, *target, path) {
                Some(bits) => targets.push(bits),
                None => return Computed::NotReady,
            }
        }
        compute_value(&relation.kind, &targets)
    }

    /// Length of `leaf` implied by already bound size relations that target it directly,
    /// once all of a relation's other targets are known.
    pub fn size_hint<P: GenericPath>(&self, leaf: VariableId, path: &P) -> SizeHint {
        for relation_id in self.tree.size_relations_of(leaf) {
            let Some(relation) = self.relation(*relation_id) else {
                continue;
            };
            let RelationKind::Size {
                unit_bits,
                offset,
                format,
            } = &relation.kind
            else {
                continue;
            };
            let Some(wire) = path.value_of(*relation_id) else {
                continue;
            };
            let Some(declared) = DataType::Integer(*format).decode(&wire).ok().and_then(|v| wide_integer(&v)) else {
                return SizeHint::Unsatisfiable;
            };
            let total = declared
                .checked_sub(i128::from(*offset))
                .and_then(|units| usize::try_from(units).ok())
                .and_then(|units| units.checked_mul(*unit_bits));
            let Some(total) = total else {
                trace!(relation = %self.tree.name_of(*relation_id), %declared, "declared size cannot be met");
                return SizeHint::Unsatisfiable;
            };
            let mut others = 0usize;
            let mut known = true;
            for target in relation.targets.iter().filter(|t| **t != leaf) {
                match self.target_bits(*relation_id, *target, path) {
                    Some(bits) => others += bits.len(),
                    None => {
                        known = false;
                        break;
                    }
                }
            }
            if known {
                return match total.checked_sub(others) {
                    Some(len) => SizeHint::Exact(len),
                    None => SizeHint::Unsatisfiable,
                };
            }
        }
        SizeHint::Open
    }

    /// Resolve pending callbacks until none makes progress, in registration order.
    /// A relation that fails is returned as the error and fails the path.
    pub fn resolve_pending<P: GenericPath>(&self, path: &mut P, direction: Direction) -> Result<(), VariableId> {
        loop {
            let mut progressed = false;
            let pending: Vec<VariableId> = path.pending().to_vec();
            for relation_id in pending {
                let bits = match self.compute(relation_id, path) {
                    Computed::NotReady => continue,
                    Computed::Failed(reason) => {
                        trace!(relation = %self.tree.name_of(relation_id), %reason, "relation failed");
                        return Err(relation_id);
                    }
                    Computed::Value(bits) => bits,
                };
                let Some(span) = path.span_of(relation_id) else {
                    return Err(relation_id);
                };
                match direction {
                    Direction::Parse => {
                        if path.value_of(relation_id).as_ref() != Some(&bits) {
                            trace!(relation = %self.tree.name_of(relation_id), "wire value does not match");
                            return Err(relation_id);
                        }
                    }
                    Direction::Specialize => {
                        if bits.len() != span.len || !path.data_mut().overwrite(span.offset, &bits) {
                            trace!(relation = %self.tree.name_of(relation_id), "computed value does not fit placeholder");
                            return Err(relation_id);
                        }
                    }
                }
                trace!(relation = %self.tree.name_of(relation_id), value = %bits, "relation resolved");
                path.pending_mut().retain(|p| *p != relation_id);
                progressed = true;
            }
            if !progressed {
                return Ok(());
            }
        }
    }
}

fn wide_integer(value: &Value) -> Option<i128> {
    match value {
        Value::Unsigned(x) => Some(i128::from(*x)),
        Value::Signed(x) => Some(i128::from(*x)),
        _ => None,
    }
}

/// Compute a relation's value from its targets' bits.
pub fn compute_value(kind: &RelationKind, targets: &[BitBuffer]) -> Computed {
    let mut joined = BitBuffer::new();
    for bits in targets {
        joined.append(bits);
    }
    match kind {
        RelationKind::Size {
            unit_bits,
            offset,
            format,
        } => {
            let Some(units) = joined.len().checked_div(*unit_bits) else {
                return Computed::Failed("zero size unit".to_string());
            };
            let units = units as i128 + i128::from(*offset);
            let Ok(units) = u64::try_from(units) else {
                return Computed::Failed(format!("size {} out of range", units));
            };
            match DataType::Integer(*format).encode(&Value::Unsigned(units)) {
                Ok(bits) => Computed::Value(bits),
                Err(e) => Computed::Failed(e.to_string()),
            }
        }
        RelationKind::Value => Computed::Value(joined),
        RelationKind::Hash(algorithm) => Computed::Value(BitBuffer::from(algorithm.digest(&joined.to_bytes()))),
        RelationKind::Hmac { algorithm, key } => match algorithm.mac(key, &joined.to_bytes()) {
            Ok(out) => Computed::Value(BitBuffer::from(out)),
            Err(e) => Computed::Failed(e.to_string()),
        },
        RelationKind::Padding {
            modulo_bits,
            offset,
            once,
            fill,
        } => {
            let len = padding_bits(joined.len(), *modulo_bits, *offset, *once);
            if len > 0 && fill.is_empty() {
                return Computed::Failed("empty padding fill".to_string());
            }
            let mut padding = BitBuffer::new();
            while padding.len() < len {
                padding.append(fill);
            }
            match padding.slice(0, len) {
                Some(bits) => Computed::Value(bits),
                None => Computed::Failed("padding shorter than required".to_string()),
            }
        }
        RelationKind::Checksum { algorithm, format } => {
            let sum = algorithm.compute(&joined.to_bytes());
            match DataType::Integer(*format).encode(&Value::Unsigned(sum)) {
                Ok(bits) => Computed::Value(bits),
                Err(e) => Computed::Failed(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{ChecksumAlgorithm, HashAlgorithm};
    use crate::types::IntegerFormat;

    #[test]
    fn size_counts_units_plus_offset() {
        let kind = RelationKind::Size {
            unit_bits: 8,
            offset: 2,
            format: IntegerFormat::uint16be(),
        };
        let targets = [BitBuffer::from_bytes(&[0; 3]), BitBuffer::from_bytes(&[0; 2])];
        assert_eq!(compute_value(&kind, &targets), Computed::Value(BitBuffer::from_bytes(&[0x00, 0x07])));
    }

    #[test]
    fn size_that_does_not_fit_fails() {
        let kind = RelationKind::Size {
            unit_bits: 8,
            offset: 0,
            format: IntegerFormat::uint8(),
        };
        let targets = [BitBuffer::zeros(300 * 8)];
        assert!(matches!(compute_value(&kind, &targets), Computed::Failed(_)));
    }

    #[test]
    fn padding_repeats_fill_to_the_modulo() {
        let kind = RelationKind::Padding {
            modulo_bits: 64,
            offset: 0,
            once: false,
            fill: BitBuffer::from_bytes(&[0xAB, 0xCD]),
        };
        let targets = [BitBuffer::from_bytes(&[0; 3])];
        assert_eq!(compute_value(&kind, &targets), Computed::Value(BitBuffer::from_bytes(&[0xAB, 0xCD, 0xAB, 0xCD, 0xAB])));
    }

    #[test]
    fn hash_over_concatenation() {
        let kind = RelationKind::Hash(HashAlgorithm::Md5);
        let targets = [BitBuffer::from_bytes(&[0xAA]), BitBuffer::from_bytes(&[0xBB])];
        match compute_value(&kind, &targets) {
            Computed::Value(bits) => assert_eq!(bits.to_hex(), "58cea1f6b2b06520613e09af90dc1c47"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn checksum_is_encoded_big_endian() {
        let kind = RelationKind::Checksum {
            algorithm: ChecksumAlgorithm::Crc16,
            format: IntegerFormat::uint16be(),
        };
        let targets = [BitBuffer::from_bytes(&[0x01, 0x02])];
        assert_eq!(compute_value(&kind, &targets), Computed::Value(BitBuffer::from_bytes(&[0x51, 0x80])));
    }
}
