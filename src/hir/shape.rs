//! CFG normalization passes that run between lowering and SSA construction.
//! After these run, block iteration order is reverse postorder (predecessors
//! precede successors except across back edges), unreachable blocks are gone,
//! predecessor sets are accurate, and instruction ids are monotonically
//! increasing in iteration order. Every later pass relies on those facts.

use hashbrown::{HashMap, HashSet};

use crate::{
    hir::{BlockId, HIRFunction, TerminalValue},
    index::Index,
};

/// Rewrites block order to reverse postorder from the entry. Blocks the
/// traversal never reaches (code after `return`, bodies of always-false
/// branches lowered behind a `Goto`) are dropped from the function entirely.
pub fn reverse_postorder_blocks(function: &mut HIRFunction) {
    let mut postorder = Vec::with_capacity(function.body.blocks.len());
    let mut visited = HashSet::new();

    // Iterative DFS; the explicit stack carries (block, next successor index)
    // so deep CFGs cannot overflow the call stack.
    let mut stack: Vec<(BlockId, Vec<BlockId>, usize)> = Vec::new();
    let entry = function.body.entry;
    visited.insert(entry);
    stack.push((entry, successors_of(function, entry), 0));

    loop {
        enum Step {
            Descend(BlockId),
            Finish(BlockId),
        }
        let step = match stack.last_mut() {
            None => break,
            Some((block, successors, cursor)) => match successors.get(*cursor) {
                Some(&next) => {
                    *cursor += 1;
                    Step::Descend(next)
                }
                None => Step::Finish(*block),
            },
        };
        match step {
            Step::Descend(next) => {
                if visited.insert(next) {
                    let next_successors = successors_of(function, next);
                    stack.push((next, next_successors, 0));
                }
            }
            Step::Finish(block) => {
                postorder.push(block);
                stack.pop();
            }
        }
    }

    postorder.reverse();
    function.body.blocks.reorder(postorder);
}

fn successors_of(function: &HIRFunction, block: BlockId) -> Vec<BlockId> {
    function.body.blocks[block].terminal.value.successors()
}

/// Recomputes every block's predecessor set from the terminals. Runs after
/// any pass that adds, removes, or retargets edges.
pub fn mark_predecessors(function: &mut HIRFunction) {
    for block in function.body.blocks.values_mut() {
        block.predecessors.clear();
    }
    let edges: Vec<(BlockId, Vec<BlockId>)> = function
        .body
        .blocks
        .iter()
        .map(|(id, block)| (id, block.terminal.value.successors()))
        .collect();
    for (predecessor, successors) in edges {
        for successor in successors {
            if let Some(block) = function.body.blocks.get_mut(successor) {
                block.predecessors.insert(predecessor);
            }
        }
    }
}

/// Collapses chains created by lowering: a block whose only predecessor ends
/// in an unconditional goto to it is folded into that predecessor. Blocks a
/// terminal references structurally (fallthroughs, loop tests and bodies,
/// handlers) keep their identity; structure recovery later relies on finding
/// them under the ids the terminals carry. Requires accurate predecessor
/// sets; leaves them accurate.
pub fn merge_consecutive_blocks(function: &mut HIRFunction) {
    let mut structural: HashSet<BlockId> = HashSet::new();
    for block in function.body.blocks.values() {
        let terminal = &block.terminal.value;
        if !matches!(terminal, TerminalValue::Goto { .. }) {
            structural.extend(terminal.successors());
        }
        if let Some(fallthrough) = terminal.fallthrough() {
            structural.insert(fallthrough);
        }
        if let TerminalValue::For {
            init, test, update, ..
        } = terminal
        {
            structural.insert(*init);
            structural.insert(*test);
            if let Some(update) = update {
                structural.insert(*update);
            }
        }
        if let TerminalValue::While { test, body, .. }
        | TerminalValue::DoWhile { body, test, .. } = terminal
        {
            structural.insert(*test);
            structural.insert(*body);
        }
    }

    let order: Vec<BlockId> = function.body.blocks.keys().collect();
    let mut rewrites: HashMap<BlockId, BlockId> = HashMap::new();

    for id in order {
        if id == function.body.entry || structural.contains(&id) {
            continue;
        }
        let Some(block) = function.body.blocks.get(id) else {
            continue;
        };
        if !block.phis.is_empty() || block.predecessors.len() != 1 {
            continue;
        }
        let predecessor = resolve(&rewrites, *block.predecessors.iter().next().unwrap());
        let is_goto_target = matches!(
            &function.body.blocks[predecessor].terminal.value,
            TerminalValue::Goto { block, .. } if *block == id
        );
        if !is_goto_target {
            continue;
        }

        let merged = function
            .body
            .blocks
            .remove(id)
            .expect("block id came from the current key set");
        let target = &mut function.body.blocks[predecessor];
        target.instructions.extend(merged.instructions);
        target.terminal = merged.terminal;
        rewrites.insert(id, predecessor);
    }

    if rewrites.is_empty() {
        return;
    }
    for block in function.body.blocks.values_mut() {
        block
            .terminal
            .value
            .map_blocks(|target| resolve(&rewrites, target));
        block.predecessors = block
            .predecessors
            .iter()
            .map(|&predecessor| resolve(&rewrites, predecessor))
            .collect();
        for phi in &mut block.phis {
            phi.operands = phi
                .operands
                .iter()
                .map(|(&predecessor, identifier)| {
                    (resolve(&rewrites, predecessor), identifier.clone())
                })
                .collect();
        }
    }
}

fn resolve(rewrites: &HashMap<BlockId, BlockId>, mut block: BlockId) -> BlockId {
    while let Some(&target) = rewrites.get(&block) {
        block = target;
    }
    block
}

/// Renumbers instruction and terminal ids sequentially in block iteration
/// order. With blocks in reverse postorder this makes instruction ids a
/// global timeline: an id comparison answers "does this happen before that"
/// for any two points not separated by a back edge, which is the property
/// mutable-range inference sweeps rely on.
pub fn mark_instruction_ids(function: &mut HIRFunction) {
    let mut next = 0usize;
    for block in function.body.blocks.values_mut() {
        for instruction in &mut block.instructions {
            instruction.id = crate::hir::InstructionId::new(next);
            next += 1;
        }
        block.terminal.id = crate::hir::InstructionId::new(next);
        next += 1;
    }
}
