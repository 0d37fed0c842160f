//! Closure discovery.
//!
//! The closure of a function is every global its instructions reference,
//! plus everything reachable from there through the initializers of eligible
//! globals. Ineligible globals are part of the closure, but their
//! initializers are not followed.
//!
//! Discovery runs an explicit worklist with a seen-set, so cyclic initializer
//! graphs terminate and the result does not depend on recursion depth.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::trace;

use crate::{
    ir::{FunctionId, GlobalId, IntWidth, Module},
    obfuscation::classify::{Classification, Classifier, Ineligibility, Shape, Verdict},
    Result,
};

/// The globals one function depends on, classified.
#[derive(Debug, Clone, Default)]
pub struct Closure {
    order: Vec<GlobalId>,
    classes: BTreeMap<GlobalId, Classification>,
    direct: BTreeSet<GlobalId>,
}

impl Closure {
    /// Discovers and classifies the closure of `function`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FunctionNotFound`] for an unknown function.
    pub fn build(module: &Module, function: FunctionId, classifier: &Classifier<'_>) -> Result<Self> {
        let body = module.try_function(function)?;

        let mut closure = Closure::default();
        let mut pending = VecDeque::new();
        let mut seen = BTreeSet::new();

        for (_, inst) in body.instructions() {
            for operand in inst.operands() {
                let Some(constant) = operand.as_const() else {
                    continue;
                };
                constant.for_each_global(&mut |id| {
                    closure.direct.insert(id);
                    if seen.insert(id) {
                        pending.push_back(id);
                    }
                });
            }
        }

        while let Some(id) = pending.pop_front() {
            let class = classifier.classify(id);
            for found in &class.discovered {
                if seen.insert(*found) {
                    pending.push_back(*found);
                }
            }
            trace!(global = %id, verdict = ?class.verdict, "classified");
            closure.order.push(id);
            closure.classes.insert(id, class);
        }

        Ok(closure)
    }

    /// Globals in discovery order.
    #[must_use]
    pub fn globals(&self) -> &[GlobalId] {
        &self.order
    }

    /// Number of globals in the closure.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if the function references no globals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns `true` if `id` is part of the closure.
    #[must_use]
    pub fn contains(&self, id: GlobalId) -> bool {
        self.classes.contains_key(&id)
    }

    /// Returns `true` if an instruction of the function references `id`.
    #[must_use]
    pub fn is_direct(&self, id: GlobalId) -> bool {
        self.direct.contains(&id)
    }

    /// Classification of a closure member.
    #[must_use]
    pub fn classification(&self, id: GlobalId) -> Option<&Classification> {
        self.classes.get(&id)
    }

    /// Shape of an eligible closure member.
    #[must_use]
    pub fn shape(&self, id: GlobalId) -> Option<Shape> {
        self.classes.get(&id).and_then(Classification::shape)
    }

    /// Eligible members with their shapes, in discovery order.
    pub fn eligible(&self) -> impl Iterator<Item = (GlobalId, Shape)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.shape(*id).map(|shape| (*id, shape)))
    }

    /// Ineligible members with the reason, in discovery order.
    pub fn ineligible(&self) -> impl Iterator<Item = (GlobalId, Ineligibility)> + '_ {
        self.order.iter().filter_map(|id| match self.classes[id].verdict {
            Verdict::Ineligible(reason) => Some((*id, reason)),
            Verdict::Eligible(_) => None,
        })
    }

    /// Eligible raw sequences of a supported width.
    #[must_use]
    pub fn raw_globals(&self) -> Vec<(GlobalId, IntWidth)> {
        self.eligible()
            .filter_map(|(id, shape)| match shape {
                Shape::Raw(Some(width)) => Some((id, width)),
                _ => None,
            })
            .collect()
    }

    /// Eligible wrappers with the raw global they point at.
    #[must_use]
    pub fn wrappers(&self) -> Vec<(GlobalId, GlobalId)> {
        self.eligible()
            .filter_map(|(id, shape)| match shape {
                Shape::Wrapper { data } => Some((id, data)),
                _ => None,
            })
            .collect()
    }

    /// Eligible members whose initializers may be rewritten in place.
    ///
    /// Wrappers are excluded: they are replaced as a whole.
    #[must_use]
    pub fn holders(&self) -> BTreeSet<GlobalId> {
        self.eligible()
            .filter(|(_, shape)| {
                matches!(
                    shape,
                    Shape::Struct | Shape::Array | Shape::Pointer | Shape::Opaque
                )
            })
            .map(|(id, _)| id)
            .collect()
    }
}
