//! Mutable-range inference. Instruction ids increase monotonically across
//! the whole function, so ranges are plain id intervals: a first scan pins
//! every identifier's range to its defining instruction, a second extends
//! `end` past each mutating reference. Values captured into aggregates are
//! tracked through a union-find of alias sets, so mutating a container keeps
//! the captured values' ranges open too.

use hashbrown::HashMap;

use crate::{
    hir::{Effect, HIRFunction, Identifier, IdentifierId, InstructionId, InstructionValue},
    index::Index,
    inference::effects::{InferredKinds, ValueKind},
};

pub fn infer_mutable_ranges(function: &mut HIRFunction, kinds: &InferredKinds) {
    // Scan 1: every definition opens a length-one range.
    let entry_id = InstructionId::new(0);
    for place in function.params.iter().chain(function.context.iter()) {
        set_range_start(&place.identifier, entry_id);
    }
    for block in function.body.blocks.values_mut() {
        let block_start = block
            .instructions
            .first()
            .map(|i| i.id)
            .unwrap_or(block.terminal.id);
        for phi in &block.phis {
            set_range_start(&phi.id, block_start);
        }
        for instruction in &mut block.instructions {
            let id = instruction.id;
            set_range_start(&instruction.lvalue.identifier, id);
            instruction.each_store(|lvalue| set_range_start(&lvalue.place.identifier, id));
        }
    }

    // Scan 2: extend ranges at mutating references, through alias sets.
    let mut aliases = AliasSets::default();
    for block in function.body.blocks.values_mut() {
        for instruction in &mut block.instructions {
            let id = instruction.id;

            // A load's result stands for the binding itself; mutating
            // through the temporary mutates the source.
            if let InstructionValue::LoadLocal { place }
            | InstructionValue::LoadContext { place } = &instruction.value
            {
                aliases.union(&instruction.lvalue.identifier, &place.identifier);
            }

            // Captures alias the operand into the value the instruction is
            // building: the stored-to binding, the method receiver, or the
            // destination temporary.
            let alias_target = match &instruction.value {
                InstructionValue::StoreLocal { lvalue, .. } => {
                    lvalue.place.identifier.clone()
                }
                InstructionValue::MethodCall { object, .. } => object.identifier.clone(),
                _ => instruction.lvalue.identifier.clone(),
            };

            instruction.each_operand(|place| {
                if place.effect == Some(Effect::Capture) {
                    aliases.union(&alias_target, &place.identifier);
                }
                if is_mutation(place.effect, place.identifier.id, kinds) {
                    aliases.extend_through(&place.identifier, id.plus(1));
                }
            });
            instruction.each_store(|lvalue| {
                extend_range(&lvalue.place.identifier, id.plus(1));
            });
        }
        block.terminal.value.each_operand(|place| {
            if is_mutation(place.effect, place.identifier.id, kinds) {
                aliases.extend_through(&place.identifier, block.terminal.id.plus(1));
            }
        });
    }
}

fn is_mutation(effect: Option<Effect>, id: IdentifierId, kinds: &InferredKinds) -> bool {
    match effect {
        Some(Effect::Mutate) | Some(Effect::Store) | Some(Effect::Capture) => true,
        // A polymorphic mutation only counts against values that can
        // actually change.
        Some(Effect::ConditionallyMutate) => kinds.kind(id) == ValueKind::Mutable,
        Some(Effect::Read) | Some(Effect::Freeze) | None => false,
    }
}

fn set_range_start(identifier: &Identifier, start: InstructionId) {
    let mut data = identifier.data.borrow_mut();
    data.mutable_range.start = start;
    data.mutable_range.end = start.plus(1);
}

fn extend_range(identifier: &Identifier, end: InstructionId) {
    let mut data = identifier.data.borrow_mut();
    if end > data.mutable_range.end {
        data.mutable_range.end = end;
    }
}

/// Union-find over identifiers that may alias one another, with enough
/// bookkeeping to extend every member's range when any member is mutated.
#[derive(Default)]
struct AliasSets {
    parents: HashMap<IdentifierId, IdentifierId>,
    members: HashMap<IdentifierId, Vec<Identifier>>,
}

impl AliasSets {
    fn find(&mut self, id: IdentifierId) -> IdentifierId {
        let mut root = id;
        while let Some(&parent) = self.parents.get(&root) {
            if parent == root {
                break;
            }
            root = parent;
        }
        // Path compression.
        let mut current = id;
        while let Some(&parent) = self.parents.get(&current) {
            if parent == root {
                break;
            }
            self.parents.insert(current, root);
            current = parent;
        }
        root
    }

    fn ensure(&mut self, identifier: &Identifier) -> IdentifierId {
        if !self.parents.contains_key(&identifier.id) {
            self.parents.insert(identifier.id, identifier.id);
            self.members
                .insert(identifier.id, vec![identifier.clone()]);
        }
        self.find(identifier.id)
    }

    fn union(&mut self, a: &Identifier, b: &Identifier) {
        let root_a = self.ensure(a);
        let root_b = self.ensure(b);
        if root_a == root_b {
            return;
        }
        self.parents.insert(root_b, root_a);
        let moved = self.members.remove(&root_b).unwrap_or_default();
        self.members.entry(root_a).or_default().extend(moved);
    }

    /// Extends the mutable range of every identifier aliasing `identifier`.
    fn extend_through(&mut self, identifier: &Identifier, end: InstructionId) {
        let root = self.ensure(identifier);
        if let Some(members) = self.members.get(&root) {
            for member in members {
                extend_range(member, end);
            }
        }
    }
}
