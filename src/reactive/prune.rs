//! Cleanup passes over the reactive tree. Structure recovery and scope
//! insertion are deliberately liberal; these passes remove what the final
//! output has no use for. Labels nothing jumps to are cleared, pure
//! instructions whose result is never read are dropped, and scope blocks
//! that expose nothing (or that an early exit can escape) are unwrapped so
//! their statements run unconditionally.

use hashbrown::{HashMap, HashSet};

use crate::{
    hir::{BlockId, IdentifierId, InstructionValue},
    reactive::{ReactiveFunction, ReactiveStatement, ReactiveTerminal},
};

/* Labels */

pub fn prune_unused_labels(function: &mut ReactiveFunction) {
    let mut used = HashSet::new();
    let mut loops = Vec::new();
    normalize_jumps(&mut function.body, &mut loops, &mut used);
    clear_labels(&mut function.body, &used);
}

/// Rewrites labeled break/continue that target the innermost enclosing loop
/// into the unlabeled form, recording which labels remain targeted.
fn normalize_jumps(
    block: &mut Vec<ReactiveStatement>,
    loops: &mut Vec<BlockId>,
    used: &mut HashSet<BlockId>,
) {
    for statement in block {
        match statement {
            ReactiveStatement::Terminal(terminal) => {
                match &mut terminal.terminal {
                    ReactiveTerminal::Break { label }
                    | ReactiveTerminal::Continue { label } => {
                        if let Some(target) = *label {
                            if loops.last() == Some(&target) {
                                *label = None;
                            } else {
                                used.insert(target);
                            }
                        }
                    }
                    _ => {}
                }
                let is_loop = matches!(
                    terminal.terminal,
                    ReactiveTerminal::While { .. }
                        | ReactiveTerminal::DoWhile { .. }
                        | ReactiveTerminal::For { .. }
                );
                if is_loop {
                    if let Some(label) = terminal.label {
                        loops.push(label);
                    }
                }
                terminal
                    .terminal
                    .each_block(|nested| normalize_jumps(nested, loops, used));
                if is_loop && terminal.label.is_some() {
                    loops.pop();
                }
            }
            ReactiveStatement::Scope(scope_block) => {
                normalize_jumps(&mut scope_block.body, loops, used);
            }
            ReactiveStatement::Instruction(_) => {}
        }
    }
}

fn clear_labels(block: &mut Vec<ReactiveStatement>, used: &HashSet<BlockId>) {
    for statement in block {
        match statement {
            ReactiveStatement::Terminal(terminal) => {
                if terminal.label.is_some_and(|label| !used.contains(&label)) {
                    terminal.label = None;
                }
                terminal
                    .terminal
                    .each_block(|nested| clear_labels(nested, used));
            }
            ReactiveStatement::Scope(scope_block) => clear_labels(&mut scope_block.body, used),
            ReactiveStatement::Instruction(_) => {}
        }
    }
}

/* Dead pure instructions */

pub fn prune_unused_lvalues(function: &mut ReactiveFunction) {
    // Removing a reader can orphan the instruction it read, so iterate to a
    // fixpoint; chains are short in practice.
    loop {
        let mut reads: HashMap<IdentifierId, usize> = HashMap::new();
        count_reads(&mut function.body, &mut reads);
        record_scope_reads(&function.body, &mut reads);

        let mut removed = false;
        remove_dead(&mut function.body, &reads, &mut removed);
        if !removed {
            return;
        }
    }
}

fn count_reads(block: &mut Vec<ReactiveStatement>, reads: &mut HashMap<IdentifierId, usize>) {
    for statement in block {
        match statement {
            ReactiveStatement::Instruction(instruction) => {
                instruction.each_operand(|place| {
                    *reads.entry(place.identifier.id).or_default() += 1;
                });
            }
            ReactiveStatement::Terminal(terminal) => {
                terminal.terminal.each_operand(|place| {
                    *reads.entry(place.identifier.id).or_default() += 1;
                });
                terminal
                    .terminal
                    .each_block(|nested| count_reads(nested, reads));
            }
            ReactiveStatement::Scope(scope_block) => count_reads(&mut scope_block.body, reads),
        }
    }
}

/// Scope metadata keeps identifiers alive: a declaration or dependency base
/// must survive for the cache guard and outputs to reference it.
fn record_scope_reads(block: &[ReactiveStatement], reads: &mut HashMap<IdentifierId, usize>) {
    for statement in block {
        match statement {
            ReactiveStatement::Scope(scope_block) => {
                {
                    let scope = scope_block.scope.borrow();
                    for dependency in &scope.dependencies {
                        *reads.entry(dependency.identifier.id).or_default() += 1;
                    }
                    for declaration in scope.declarations.values() {
                        *reads.entry(declaration.id).or_default() += 1;
                    }
                    for reassignment in &scope.reassignments {
                        *reads.entry(reassignment.id).or_default() += 1;
                    }
                }
                record_scope_reads(&scope_block.body, reads);
            }
            ReactiveStatement::Terminal(terminal) => match &terminal.terminal {
                ReactiveTerminal::If {
                    consequent,
                    alternate,
                    ..
                } => {
                    record_scope_reads(consequent, reads);
                    if let Some(alternate) = alternate {
                        record_scope_reads(alternate, reads);
                    }
                }
                ReactiveTerminal::Logical { rhs, .. } => record_scope_reads(rhs, reads),
                ReactiveTerminal::Ternary {
                    consequent,
                    alternate,
                    ..
                } => {
                    record_scope_reads(consequent, reads);
                    record_scope_reads(alternate, reads);
                }
                ReactiveTerminal::While { test, body, .. } => {
                    record_scope_reads(test, reads);
                    record_scope_reads(body, reads);
                }
                ReactiveTerminal::DoWhile { body, test, .. } => {
                    record_scope_reads(body, reads);
                    record_scope_reads(test, reads);
                }
                ReactiveTerminal::For {
                    init,
                    test,
                    update,
                    body,
                    ..
                } => {
                    record_scope_reads(init, reads);
                    record_scope_reads(test, reads);
                    record_scope_reads(update, reads);
                    record_scope_reads(body, reads);
                }
                ReactiveTerminal::Label { body } => record_scope_reads(body, reads),
                ReactiveTerminal::Try { body, handler, .. } => {
                    record_scope_reads(body, reads);
                    record_scope_reads(handler, reads);
                }
                ReactiveTerminal::Break { .. }
                | ReactiveTerminal::Continue { .. }
                | ReactiveTerminal::Return { .. }
                | ReactiveTerminal::Throw { .. } => {}
            },
            ReactiveStatement::Instruction(_) => {}
        }
    }
}

fn remove_dead(
    block: &mut Vec<ReactiveStatement>,
    reads: &HashMap<IdentifierId, usize>,
    removed: &mut bool,
) {
    block.retain_mut(|statement| match statement {
        ReactiveStatement::Instruction(instruction) => {
            let pure = matches!(
                instruction.value,
                InstructionValue::Primitive { .. }
                    | InstructionValue::LoadLocal { .. }
                    | InstructionValue::LoadContext { .. }
                    | InstructionValue::LoadGlobal { .. }
                    | InstructionValue::PropertyLoad { .. }
            );
            let unread = !reads.contains_key(&instruction.lvalue.identifier.id);
            if pure && unread {
                *removed = true;
                false
            } else {
                true
            }
        }
        ReactiveStatement::Terminal(terminal) => {
            terminal
                .terminal
                .each_block(|nested| remove_dead(nested, reads, removed));
            true
        }
        ReactiveStatement::Scope(scope_block) => {
            remove_dead(&mut scope_block.body, reads, removed);
            true
        }
    });
}

/* Scopes */

/// Unwraps scope blocks that either expose nothing (no declarations or
/// reassignments survive to justify a cache slot) or contain an abrupt exit
/// that would escape the guarded region. The statements always survive;
/// only the memoization wrapper is removed.
pub fn prune_unused_scopes(function: &mut ReactiveFunction) {
    unwrap_scopes(&mut function.body);
}

fn unwrap_scopes(block: &mut Vec<ReactiveStatement>) {
    let mut index = 0;
    while index < block.len() {
        match &mut block[index] {
            ReactiveStatement::Scope(scope_block) => {
                unwrap_scopes(&mut scope_block.body);
                let pointless = {
                    let scope = scope_block.scope.borrow();
                    scope.declarations.is_empty() && scope.reassignments.is_empty()
                };
                if pointless || contains_abrupt_exit(&scope_block.body) {
                    let ReactiveStatement::Scope(scope_block) = block.remove(index) else {
                        unreachable!("match arm guarantees a scope statement");
                    };
                    let body_len = scope_block.body.len();
                    block.splice(index..index, scope_block.body);
                    index += body_len;
                } else {
                    index += 1;
                }
            }
            ReactiveStatement::Terminal(terminal) => {
                terminal.terminal.each_block(unwrap_scopes);
                index += 1;
            }
            ReactiveStatement::Instruction(_) => index += 1,
        }
    }
}

/// A return or throw anywhere in the subtree can leave the function from
/// inside the scope, which a cache-hit path could not replay.
fn contains_abrupt_exit(block: &[ReactiveStatement]) -> bool {
    let mut found = false;
    scan(block, &mut found);
    return found;

    fn scan(block: &[ReactiveStatement], found: &mut bool) {
        for statement in block {
            if *found {
                return;
            }
            match statement {
                ReactiveStatement::Terminal(terminal) => match &terminal.terminal {
                    ReactiveTerminal::Return { .. } | ReactiveTerminal::Throw { .. } => {
                        *found = true;
                    }
                    ReactiveTerminal::If {
                        consequent,
                        alternate,
                        ..
                    } => {
                        scan(consequent, found);
                        if let Some(alternate) = alternate {
                            scan(alternate, found);
                        }
                    }
                    ReactiveTerminal::Logical { rhs, .. } => scan(rhs, found),
                    ReactiveTerminal::Ternary {
                        consequent,
                        alternate,
                        ..
                    } => {
                        scan(consequent, found);
                        scan(alternate, found);
                    }
                    ReactiveTerminal::While { test, body, .. } => {
                        scan(test, found);
                        scan(body, found);
                    }
                    ReactiveTerminal::DoWhile { body, test, .. } => {
                        scan(body, found);
                        scan(test, found);
                    }
                    ReactiveTerminal::For {
                        init,
                        test,
                        update,
                        body,
                        ..
                    } => {
                        scan(init, found);
                        scan(test, found);
                        scan(update, found);
                        scan(body, found);
                    }
                    ReactiveTerminal::Label { body } => scan(body, found),
                    ReactiveTerminal::Try { body, handler, .. } => {
                        scan(body, found);
                        scan(handler, found);
                    }
                    ReactiveTerminal::Break { .. } | ReactiveTerminal::Continue { .. } => {}
                },
                ReactiveStatement::Scope(scope_block) => scan(&scope_block.body, found),
                ReactiveStatement::Instruction(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{align, build, build::tests::reactive, deps, merge, ReactiveFunction};

    fn pruned(json: &str) -> ReactiveFunction {
        let mut function = reactive(json);
        align::align_reactive_scopes_to_block_scopes(&mut function);
        merge::merge_overlapping_reactive_scopes(&mut function);
        build::build_reactive_scopes(&mut function);
        deps::propagate_scope_dependencies(&mut function);
        prune_unused_labels(&mut function);
        prune_unused_lvalues(&mut function);
        prune_unused_scopes(&mut function);
        function
    }

    fn count_scopes(block: &[ReactiveStatement]) -> usize {
        block
            .iter()
            .map(|statement| match statement {
                ReactiveStatement::Scope(scope_block) => 1 + count_scopes(&scope_block.body),
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn loop_labels_nothing_targets_are_cleared() {
        let function = pruned(
            r#"{
                "params": [{"name": "n"}],
                "body": {"body": [
                    {"type": "WhileStatement",
                     "test": {"type": "Identifier", "name": "n"},
                     "body": {"type": "BreakStatement"}},
                    {"type": "ReturnStatement"}
                ]}
            }"#,
        );
        fn no_labels(block: &[ReactiveStatement]) {
            for statement in block {
                match statement {
                    ReactiveStatement::Terminal(terminal) => {
                        assert!(terminal.label.is_none(), "label survived pruning");
                        if let ReactiveTerminal::While { test, body, .. } = &terminal.terminal {
                            no_labels(test);
                            no_labels(body);
                        }
                    }
                    ReactiveStatement::Scope(scope_block) => no_labels(&scope_block.body),
                    ReactiveStatement::Instruction(_) => {}
                }
            }
        }
        no_labels(&function.body);
    }

    #[test]
    fn scope_whose_value_escapes_survives() {
        let function = pruned(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "pair"},
                                       "init": {"type": "ArrayExpression",
                                                "elements": [{"type": "Identifier", "name": "props"}]}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "pair"}}
                ]}
            }"#,
        );
        assert_eq!(count_scopes(&function.body), 1);
    }

    #[test]
    fn scope_containing_a_return_is_unwrapped() {
        let function = pruned(
            r#"{
                "params": [{"name": "cond"}, {"name": "props"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "pair"},
                                       "init": {"type": "ArrayExpression",
                                                "elements": [{"type": "Identifier", "name": "props"}]}}]},
                    {"type": "IfStatement",
                     "test": {"type": "Identifier", "name": "cond"},
                     "consequent": {"type": "ReturnStatement",
                                    "argument": {"type": "Identifier", "name": "pair"}}},
                    {"type": "ExpressionStatement",
                     "expression": {"type": "CallExpression",
                                    "callee": {"type": "MemberExpression",
                                               "object": {"type": "Identifier", "name": "pair"},
                                               "property": {"type": "Identifier", "name": "push"}},
                                    "arguments": [{"type": "Literal", "value": 1.0}]}},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "pair"}}
                ]}
            }"#,
        );
        // The conditional return sits inside `pair`'s mutable range, so the
        // scope block would capture it; pruning unwraps rather than memoize
        // across an early exit.
        assert_eq!(count_scopes(&function.body), 0);
    }

    #[test]
    fn dead_property_loads_are_removed() {
        let function = pruned(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "ExpressionStatement",
                     "expression": {"type": "MemberExpression",
                                    "object": {"type": "Identifier", "name": "props"},
                                    "property": {"type": "Identifier", "name": "unused"}}},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Literal", "value": 1.0}}
                ]}
            }"#,
        );
        fn assert_no_property_loads(block: &[ReactiveStatement]) {
            for statement in block {
                if let ReactiveStatement::Instruction(instruction) = statement {
                    assert!(!matches!(
                        instruction.value,
                        InstructionValue::PropertyLoad { .. }
                    ));
                }
            }
        }
        assert_no_property_loads(&function.body);
    }
}
