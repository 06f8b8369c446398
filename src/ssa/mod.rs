//! SSA construction. `enter_ssa` gives every assignment to a variable a
//! fresh identifier version and inserts phis at merge points; blocks are
//! visited in reverse postorder, so only back-edge predecessors are unseen
//! when a block is reached, and the phis speculatively created for loop
//! headers get their back-edge operands filled in after the sweep.
//! `eliminate_redundant_phi` then removes phis whose operands all agree.
//!
//! Variables captured by nested functions (the function's own context and
//! anything declared via `DeclareContext`) are exempt from renaming: their
//! identity must stay stable across closure boundaries.

pub mod leave;

use hashbrown::{HashMap, HashSet};

use crate::{
    environment::Environment,
    hir::{BlockId, HIRFunction, Identifier, IdentifierId, InstructionValue, Phi, Type},
};

/// Which source variable each SSA version stands for. `leave_ssa` uses this
/// to fold all versions of a variable back into one binding; a phi web alone
/// is not enough, because the initial version is not connected through any
/// phi when every path reassigns.
#[derive(Debug, Default)]
pub struct SsaVersions {
    map: HashMap<IdentifierId, IdentifierId>,
}

impl SsaVersions {
    fn record(&mut self, version: IdentifierId, original: IdentifierId) {
        self.map.insert(version, original);
    }

    /// The source variable behind `id`: itself unless it is a recorded
    /// version.
    pub fn original(&self, id: IdentifierId) -> IdentifierId {
        self.map.get(&id).copied().unwrap_or(id)
    }

    pub fn is_version(&self, id: IdentifierId) -> bool {
        self.map.contains_key(&id)
    }
}

pub fn enter_ssa(env: &Environment, function: &mut HIRFunction) -> SsaVersions {
    let mut context_ids: HashSet<IdentifierId> =
        function.context.iter().map(|p| p.identifier.id).collect();
    for block in function.body.blocks.values() {
        for instruction in &block.instructions {
            if let InstructionValue::DeclareContext { lvalue } = &instruction.value {
                context_ids.insert(lvalue.place.identifier.id);
            }
        }
    }

    let mut versions = SsaVersions::default();

    // Exit state of each processed block: original variable -> live version.
    let mut exits: HashMap<BlockId, HashMap<IdentifierId, Identifier>> = HashMap::new();
    // Loop-header phis still waiting on back-edge operands:
    // (block, original variable, phi identifier, pending predecessors).
    let mut incomplete: Vec<(BlockId, IdentifierId, IdentifierId, Vec<BlockId>)> = Vec::new();

    let order: Vec<BlockId> = function.body.blocks.keys().collect();
    for id in order {
        let predecessors: Vec<BlockId> = function.body.blocks[id]
            .predecessors
            .iter()
            .copied()
            .collect();

        let mut state: HashMap<IdentifierId, Identifier> = HashMap::new();
        let mut new_phis: Vec<Phi> = Vec::new();

        if id == function.body.entry {
            for place in function.params.iter().chain(function.context.iter()) {
                state.insert(place.identifier.id, place.identifier.clone());
            }
        } else {
            let processed: Vec<BlockId> = predecessors
                .iter()
                .copied()
                .filter(|p| exits.contains_key(p))
                .collect();
            let pending: Vec<BlockId> = predecessors
                .iter()
                .copied()
                .filter(|p| !exits.contains_key(p))
                .collect();

            // Variables defined along every already-processed incoming path.
            let mut variables: Vec<IdentifierId> = Vec::new();
            if let Some(first) = processed.first() {
                for &variable in exits[first].keys() {
                    if processed.iter().all(|p| exits[p].contains_key(&variable)) {
                        variables.push(variable);
                    }
                }
            }
            variables.sort();

            for variable in variables {
                let incoming: Vec<Identifier> = processed
                    .iter()
                    .map(|p| exits[p][&variable].clone())
                    .collect();
                let all_same = incoming.windows(2).all(|w| w[0].id == w[1].id);

                if pending.is_empty() && all_same {
                    state.insert(variable, incoming[0].clone());
                    continue;
                }
                if context_ids.contains(&variable) {
                    state.insert(variable, incoming[0].clone());
                    continue;
                }

                // A merge with disagreeing versions, or a loop header where a
                // back edge may carry a new version: place a phi.
                let phi_identifier =
                    Identifier::new(env.next_identifier_id(), incoming[0].name.clone());
                let mut operands = std::collections::BTreeMap::new();
                for (predecessor, version) in processed.iter().zip(&incoming) {
                    operands.insert(*predecessor, version.clone());
                }
                if !pending.is_empty() {
                    incomplete.push((id, variable, phi_identifier.id, pending.clone()));
                }
                versions.record(phi_identifier.id, variable);
                state.insert(variable, phi_identifier.clone());
                new_phis.push(Phi {
                    id: phi_identifier,
                    operands,
                    ty: Type::Unknown,
                });
            }
        }

        let block = function.body.blocks.get_mut(id).expect("block exists");
        block.phis.extend(new_phis);

        for instruction in &mut block.instructions {
            instruction.each_operand(|place| {
                if let Some(version) = state.get(&place.identifier.id) {
                    place.identifier = version.clone();
                }
            });
            instruction.each_store(|lvalue| {
                let original = lvalue.place.identifier.id;
                if context_ids.contains(&original) {
                    return;
                }
                let version =
                    Identifier::new(env.next_identifier_id(), lvalue.place.identifier.name.clone());
                versions.record(version.id, original);
                state.insert(original, version.clone());
                lvalue.place.identifier = version;
            });
        }
        block.terminal.value.each_operand(|place| {
            if let Some(version) = state.get(&place.identifier.id) {
                place.identifier = version.clone();
            }
        });

        exits.insert(id, state);
    }

    // Back edges have now been processed; complete the loop-header phis.
    for (block_id, variable, phi_id, pending) in incomplete {
        let block = function.body.blocks.get_mut(block_id).expect("block exists");
        let phi = block
            .phis
            .iter_mut()
            .find(|phi| phi.id.id == phi_id)
            .expect("incomplete phi is still present");
        for predecessor in pending {
            let version = exits
                .get(&predecessor)
                .and_then(|state| state.get(&variable))
                .cloned()
                // No definition reaches around this edge; the phi is then
                // redundant on it and elimination cleans it up.
                .unwrap_or_else(|| phi.id.clone());
            phi.operands.insert(predecessor, version);
        }
    }

    versions
}

/// Removes phis whose operands (ignoring self-references) are all the same
/// identifier, rewriting uses to that identifier. Runs to fixpoint since one
/// elimination can make another phi redundant.
pub fn eliminate_redundant_phi(function: &mut HIRFunction) {
    loop {
        let mut rewrites: HashMap<IdentifierId, Identifier> = HashMap::new();

        for block in function.body.blocks.values_mut() {
            block.phis.retain(|phi| {
                let mut distinct: Option<&Identifier> = None;
                let mut redundant = true;
                for operand in phi.operands.values() {
                    if operand.id == phi.id.id {
                        continue;
                    }
                    match distinct {
                        None => distinct = Some(operand),
                        Some(existing) if existing.id == operand.id => {}
                        Some(_) => {
                            redundant = false;
                            break;
                        }
                    }
                }
                match (redundant, distinct) {
                    (true, Some(replacement)) => {
                        rewrites.insert(phi.id.id, replacement.clone());
                        false
                    }
                    _ => true,
                }
            });
        }

        if rewrites.is_empty() {
            return;
        }

        let resolve = |identifier: &mut Identifier| {
            let mut current = identifier.clone();
            while let Some(next) = rewrites.get(&current.id) {
                current = next.clone();
            }
            *identifier = current;
        };

        for block in function.body.blocks.values_mut() {
            for phi in &mut block.phis {
                for operand in phi.operands.values_mut() {
                    resolve(operand);
                }
            }
            for instruction in &mut block.instructions {
                instruction.each_operand(|place| resolve(&mut place.identifier));
            }
            block
                .terminal
                .value
                .each_operand(|place| resolve(&mut place.identifier));
        }
    }
}
