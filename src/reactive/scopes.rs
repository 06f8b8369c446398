//! Reactive scope assignment. Groups identifiers whose mutable ranges
//! overlap (or directly abut) into shared scopes, the minimal units of
//! recomputation. Grouping is deliberately coarse at this stage; alignment
//! and merging refine the boundaries, pruning drops scopes nothing reads.
//!
//! Hook calls are barriers: their results are never memoized and no scope
//! may span across one, since memoizing would make the call conditional.

use std::{cell::RefCell, rc::Rc};

use hashbrown::{HashMap, HashSet};

use crate::{
    environment::{Environment, GlobalKind},
    hir::{
        HIRFunction, Identifier, IdentifierId, InstructionId, InstructionKind, InstructionValue,
        MutableRange, ReactiveScope, ScopeRef,
    },
};

pub fn infer_reactive_scope_variables(env: &Environment, function: &mut HIRFunction) {
    let excluded: HashSet<IdentifierId> = function
        .params
        .iter()
        .chain(function.context.iter())
        .map(|place| place.identifier.id)
        .collect();

    let mut candidates: HashMap<IdentifierId, Identifier> = HashMap::new();
    let mut barriers: Vec<InstructionId> = Vec::new();
    let mut hook_refs: HashSet<IdentifierId> = HashSet::new();
    let mut hook_results: HashSet<IdentifierId> = HashSet::new();
    // Which earlier candidates each value derives from, tracked through the
    // temporaries between them.
    let mut flows: HashMap<IdentifierId, HashSet<IdentifierId>> = HashMap::new();

    for block in function.body.blocks.values_mut() {
        for instruction in &mut block.instructions {
            match &instruction.value {
                InstructionValue::LoadGlobal { name } => {
                    if env.global_kind(name) == GlobalKind::Hook || env.is_hook_name(name) {
                        hook_refs.insert(instruction.lvalue.identifier.id);
                    }
                }
                InstructionValue::Call { callee, .. }
                    if hook_refs.contains(&callee.identifier.id) =>
                {
                    barriers.push(instruction.id);
                    hook_results.insert(instruction.lvalue.identifier.id);
                }
                _ => {}
            }

            let complex = matches!(
                instruction.value,
                InstructionValue::Object { .. }
                    | InstructionValue::Array { .. }
                    | InstructionValue::JsxElement { .. }
                    | InstructionValue::Call { .. }
                    | InstructionValue::MethodCall { .. }
                    | InstructionValue::FunctionExpression { .. }
            ) && !hook_results.contains(&instruction.lvalue.identifier.id);

            let mut sources: HashSet<IdentifierId> = HashSet::new();
            instruction.each_operand(|place| {
                let id = place.identifier.id;
                if candidates.contains_key(&id) {
                    sources.insert(id);
                }
                if let Some(flow) = flows.get(&id) {
                    sources.extend(flow.iter().copied());
                }
            });

            let dest = &instruction.lvalue.identifier;
            if (complex || dest.mutable_range().is_mutable())
                && !excluded.contains(&dest.id)
                && !hook_results.contains(&dest.id)
            {
                candidates.entry(dest.id).or_insert_with(|| dest.clone());
            }
            flows.insert(instruction.lvalue.identifier.id, sources.clone());
            instruction.each_store(|lvalue| {
                let identifier = &lvalue.place.identifier;
                if (identifier.is_named() || identifier.mutable_range().is_mutable())
                    && !excluded.contains(&identifier.id)
                {
                    candidates
                        .entry(identifier.id)
                        .or_insert_with(|| identifier.clone());
                }
                flows.insert(identifier.id, sources.clone());
            });
        }
    }

    barriers.sort_unstable();

    // Sweep the candidate ranges in start order, folding a candidate into
    // the open group when the ranges overlap or touch, or when the candidate
    // derives entirely from group members (it invalidates exactly when they
    // do), and no hook call sits between them.
    let mut sorted: Vec<Identifier> = candidates.into_values().collect();
    sorted.sort_by_key(|identifier| (identifier.mutable_range().start, identifier.id));

    let mut groups: Vec<(MutableRange, Vec<Identifier>)> = Vec::new();
    for identifier in sorted {
        let range = identifier.mutable_range();
        match groups.last_mut() {
            Some((group_range, members))
                if (range.start <= group_range.end
                    || invalidates_with(&flows, &identifier, members))
                    && !has_barrier(&barriers, group_range.start, range.end.max(group_range.end)) =>
            {
                group_range.end = group_range.end.max(range.end);
                members.push(identifier);
            }
            _ => groups.push((range, vec![identifier])),
        }
    }

    let mut scopes: Vec<ScopeRef> = Vec::new();
    for (range, members) in groups {
        let scope: ScopeRef = Rc::new(RefCell::new(ReactiveScope::new(env.next_scope_id(), range)));
        for member in &members {
            member.data.borrow_mut().scope = Some(Rc::clone(&scope));
        }
        scopes.push(scope);
    }

    record_outputs(function, &scopes);
}

fn has_barrier(barriers: &[InstructionId], start: InstructionId, end: InstructionId) -> bool {
    barriers.iter().any(|&b| b >= start && b < end)
}

/// A candidate whose reactive inputs are all members of the open group
/// invalidates exactly when the group does; a separate cache slot would
/// always hit and miss in lockstep with the group's.
fn invalidates_with(
    flows: &HashMap<IdentifierId, HashSet<IdentifierId>>,
    identifier: &Identifier,
    members: &[Identifier],
) -> bool {
    match flows.get(&identifier.id) {
        Some(sources) if !sources.is_empty() => sources
            .iter()
            .all(|source| members.iter().any(|member| member.id == *source)),
        _ => false,
    }
}

/// Fills each scope's declarations and reassignments. A declaration is a
/// scope member read after the scope's range ends (an output the scope must
/// expose); a reassignment is a write inside the range to a binding the
/// scope does not own (a context variable, typically).
fn record_outputs(function: &mut HIRFunction, scopes: &[ScopeRef]) {
    for block in function.body.blocks.values_mut() {
        for instruction in &mut block.instructions {
            let id = instruction.id;
            instruction.each_operand(|place| record_read(&place.identifier, id));
            instruction.each_store(|lvalue| {
                // A reassignment of a binding the scope does not own (a
                // context variable, typically) is still an output the scope
                // must expose on cache hits.
                if lvalue.kind == InstructionKind::Reassign
                    && lvalue.place.identifier.scope().is_none()
                {
                    if let Some(scope) = scope_containing(scopes, id) {
                        let mut scope = scope.borrow_mut();
                        if !scope
                            .reassignments
                            .iter()
                            .any(|existing| existing.id == lvalue.place.identifier.id)
                        {
                            scope.reassignments.push(lvalue.place.identifier.clone());
                        }
                    }
                }
            });
        }
        let terminal_id = block.terminal.id;
        block
            .terminal
            .value
            .each_operand(|place| record_read(&place.identifier, terminal_id));
    }
}

fn record_read(identifier: &Identifier, at: InstructionId) {
    let Some(scope) = identifier.scope() else {
        return;
    };
    let range = scope.borrow().range;
    if at >= range.end {
        scope
            .borrow_mut()
            .declarations
            .insert(identifier.id, identifier.clone());
    }
}

fn scope_containing(scopes: &[ScopeRef], at: InstructionId) -> Option<ScopeRef> {
    scopes
        .iter()
        .find(|scope| {
            let range = scope.borrow().range;
            at >= range.start && at < range.end
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast,
        environment::Config,
        hir::{lowering, shape},
        inference::{effects, ranges},
        ssa,
    };

    fn scoped(json: &str) -> (Environment, HIRFunction) {
        let ast: ast::Function = serde_json::from_str(json).unwrap();
        let env = Environment::new(Config::default()).unwrap();
        let mut function = lowering::lower(&env, &ast).unwrap();
        shape::reverse_postorder_blocks(&mut function);
        shape::mark_instruction_ids(&mut function);
        shape::mark_predecessors(&mut function);
        let versions = ssa::enter_ssa(&env, &mut function);
        ssa::eliminate_redundant_phi(&mut function);
        let kinds = effects::infer_reference_effects(&env, &mut function);
        ranges::infer_mutable_ranges(&mut function, &kinds);
        ssa::leave::leave_ssa(&mut function, &versions);
        infer_reactive_scope_variables(&env, &mut function);
        (env, function)
    }

    fn scope_of(function: &mut HIRFunction, name: &str) -> Option<ScopeRef> {
        let mut found = None;
        for block in function.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                instruction.each_store(|lvalue| {
                    if lvalue.place.identifier.name.as_deref() == Some(name) {
                        found = lvalue.place.identifier.scope();
                    }
                });
            }
        }
        found
    }

    #[test]
    fn chained_declarations_share_one_scope() {
        let (_, mut function) = scoped(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "let",
                     "declarations": [{"id": {"name": "x"},
                                       "init": {"type": "MemberExpression",
                                                "object": {"type": "Identifier", "name": "props"},
                                                "property": {"type": "Identifier", "name": "x"}}}]},
                    {"type": "VariableDeclaration", "kind": "let",
                     "declarations": [{"id": {"name": "y"},
                                       "init": {"type": "BinaryExpression", "operator": "+",
                                                "left": {"type": "Identifier", "name": "x"},
                                                "right": {"type": "Literal", "value": 1.0}}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "y"}}
                ]}
            }"#,
        );
        let x = scope_of(&mut function, "x").expect("x has a scope");
        let y = scope_of(&mut function, "y").expect("y has a scope");
        assert_eq!(x.borrow().id, y.borrow().id);
        // Only `y` escapes the scope (the return reads it); `x` is internal.
        let scope = y.borrow();
        let declared: Vec<_> = scope
            .declarations
            .values()
            .map(|d| d.name.clone().unwrap_or_default())
            .collect();
        assert!(declared.contains(&"y".to_owned()), "declared: {declared:?}");
        assert!(!declared.contains(&"x".to_owned()), "declared: {declared:?}");
    }

    #[test]
    fn params_never_get_scopes() {
        let (_, mut function) = scoped(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "props"}}
                ]}
            }"#,
        );
        for place in &function.params {
            assert!(place.identifier.scope().is_none());
        }
    }

    #[test]
    fn hook_results_are_not_memoized() {
        let (_, mut function) = scoped(
            r#"{
                "params": [],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "state"},
                                       "init": {"type": "CallExpression",
                                                "callee": {"type": "Identifier", "name": "useState"},
                                                "arguments": [{"type": "Literal", "value": 0.0}]}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "state"}}
                ]}
            }"#,
        );
        // The binding itself may be grouped, but the call's destination
        // value must not be, and no scope may span the hook call.
        let mut hook_dest_scoped = false;
        for block in function.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                if matches!(instruction.value, InstructionValue::Call { .. })
                    && instruction.lvalue.identifier.scope().is_some()
                {
                    hook_dest_scoped = true;
                }
            }
        }
        assert!(!hook_dest_scoped);
    }

    #[test]
    fn mutated_array_scope_covers_the_mutation() {
        let (_, mut function) = scoped(
            r#"{
                "params": [{"name": "item"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "list"},
                                       "init": {"type": "ArrayExpression", "elements": []}}]},
                    {"type": "ExpressionStatement",
                     "expression": {"type": "CallExpression",
                                    "callee": {"type": "MemberExpression",
                                               "object": {"type": "Identifier", "name": "list"},
                                               "property": {"type": "Identifier", "name": "push"}},
                                    "arguments": [{"type": "Identifier", "name": "item"}]}},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "list"}}
                ]}
            }"#,
        );
        let scope = scope_of(&mut function, "list").expect("list has a scope");
        let scope = scope.borrow();
        let list_range = {
            let mut range = None;
            for block in function.body.blocks.values() {
                for instruction in &block.instructions {
                    if let InstructionValue::MethodCall { object, .. } = &instruction.value {
                        range = Some((object.identifier.mutable_range(), instruction.id));
                    }
                }
            }
            range.expect("push call exists")
        };
        // The scope extends past the push, so the wrapped statements include
        // the mutation.
        assert!(scope.range.end > list_range.1);
    }
}
