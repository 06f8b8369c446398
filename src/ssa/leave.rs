//! SSA destruction. Every version of a source variable is folded back into a
//! single binding (the earliest version), phis are deleted, and the mutable
//! ranges inference computed for the individual versions are unioned onto the
//! surviving identifier, so a reassigned variable presents one range spanning
//! its first definition through its last write.

use hashbrown::{HashMap, HashSet};

use crate::{
    hir::{
        HIRFunction, Identifier, IdentifierId, InstructionKind, InstructionValue, MutableRange,
    },
    ssa::SsaVersions,
};

pub fn leave_ssa(function: &mut HIRFunction, versions: &SsaVersions) {
    // Earliest identifier object seen per source variable. Version ids are
    // allocated after the variable's own id, so "smallest id wins" picks the
    // original when it appears and the first version otherwise.
    let mut canonical: HashMap<IdentifierId, Identifier> = HashMap::new();
    let mut members: HashMap<IdentifierId, Vec<Identifier>> = HashMap::new();

    let mut consider = |identifier: &Identifier| {
        let original = versions.original(identifier.id);
        if !versions.is_version(identifier.id) && original == identifier.id {
            // Not part of any version group; nothing to fold.
            return;
        }
        let entry = canonical
            .entry(original)
            .or_insert_with(|| identifier.clone());
        if identifier.id < entry.id {
            *entry = identifier.clone();
        }
        members
            .entry(original)
            .or_default()
            .push(identifier.clone());
    };

    for place in function.params.iter().chain(function.context.iter()) {
        consider(&place.identifier);
    }
    for block in function.body.blocks.values_mut() {
        for phi in &block.phis {
            consider(&phi.id);
            for operand in phi.operands.values() {
                consider(operand);
            }
        }
        for instruction in &mut block.instructions {
            instruction.each_operand(|place| consider(&place.identifier));
            instruction.each_store(|lvalue| consider(&lvalue.place.identifier));
        }
        block.terminal.value.each_operand(|place| consider(&place.identifier));
    }

    // Union the versions' mutable ranges onto the canonical identifier.
    for (original, group) in &members {
        let target = &canonical[original];
        let mut range: Option<MutableRange> = None;
        for member in group {
            let member_range = member.mutable_range();
            if member_range == MutableRange::default() {
                continue;
            }
            range = Some(match range {
                None => member_range,
                Some(existing) => MutableRange {
                    start: existing.start.min(member_range.start),
                    end: existing.end.max(member_range.end),
                },
            });
        }
        if let Some(range) = range {
            target.data.borrow_mut().mutable_range = range;
        }
    }

    let rewrite = |identifier: &mut Identifier| {
        let original = versions.original(identifier.id);
        if let Some(target) = canonical.get(&original) {
            if target.id != identifier.id {
                *identifier = target.clone();
            }
        }
    };

    for block in function.body.blocks.values_mut() {
        block.phis.clear();
        for instruction in &mut block.instructions {
            instruction.each_operand(|place| rewrite(&mut place.identifier));
            instruction.each_store(|lvalue| rewrite(&mut lvalue.place.identifier));
        }
        block.terminal.value.each_operand(|place| rewrite(&mut place.identifier));
    }

    reconcile_kinds(function);
}

/// With versions folded, the store kinds reflect what actually happened to
/// each binding rather than its source syntax: a `let` whose only write is
/// its initial definition surfaces as `const`. Context variables are left
/// alone; an inner function may write them out of this function's sight.
fn reconcile_kinds(function: &mut HIRFunction) {
    let mut writes: HashMap<IdentifierId, usize> = HashMap::new();
    let mut untouchable: HashSet<IdentifierId> = function
        .context
        .iter()
        .map(|place| place.identifier.id)
        .collect();
    for block in function.body.blocks.values_mut() {
        for instruction in &mut block.instructions {
            if let InstructionValue::DeclareLocal { lvalue }
            | InstructionValue::DeclareContext { lvalue } = &instruction.value
            {
                untouchable.insert(lvalue.place.identifier.id);
            }
            instruction.each_store(|lvalue| {
                *writes.entry(lvalue.place.identifier.id).or_default() += 1;
            });
        }
    }

    for block in function.body.blocks.values_mut() {
        for instruction in &mut block.instructions {
            if let InstructionValue::StoreLocal { lvalue, .. } = &mut instruction.value {
                let id = lvalue.place.identifier.id;
                if lvalue.kind == InstructionKind::Let
                    && writes.get(&id) == Some(&1)
                    && !untouchable.contains(&id)
                {
                    lvalue.kind = InstructionKind::Const;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hashbrown::HashSet;

    use crate::{
        ast,
        environment::{Config, Environment},
        hir::{lowering, shape, HIRFunction, InstructionKind, InstructionValue},
        ssa,
    };

    fn compile_to_post_ssa(json: &str) -> HIRFunction {
        let ast: ast::Function = serde_json::from_str(json).unwrap();
        let env = Environment::new(Config::default()).unwrap();
        let mut function = lowering::lower(&env, &ast).unwrap();
        shape::reverse_postorder_blocks(&mut function);
        shape::mark_instruction_ids(&mut function);
        shape::mark_predecessors(&mut function);
        let versions = ssa::enter_ssa(&env, &mut function);
        ssa::eliminate_redundant_phi(&mut function);
        super::leave_ssa(&mut function, &versions);
        function
    }

    const IF_ELSE_REASSIGN: &str = r#"{
        "params": [{"name": "cond"}],
        "body": {"body": [
            {"type": "VariableDeclaration", "kind": "let",
             "declarations": [{"id": {"name": "x"},
                               "init": {"type": "Literal", "value": 0.0}}]},
            {"type": "IfStatement",
             "test": {"type": "Identifier", "name": "cond"},
             "consequent": {"type": "ExpressionStatement",
                            "expression": {"type": "AssignmentExpression",
                                           "operator": "=",
                                           "left": {"type": "Identifier", "name": "x"},
                                           "right": {"type": "Literal", "value": 1.0}}},
             "alternate": {"type": "ExpressionStatement",
                           "expression": {"type": "AssignmentExpression",
                                          "operator": "=",
                                          "left": {"type": "Identifier", "name": "x"},
                                          "right": {"type": "Literal", "value": 2.0}}}},
            {"type": "ReturnStatement",
             "argument": {"type": "Identifier", "name": "x"}}
        ]}
    }"#;

    #[test]
    fn round_trip_restores_a_single_binding() {
        let mut function = compile_to_post_ssa(IF_ELSE_REASSIGN);

        for block in function.body.blocks.values() {
            assert!(block.phis.is_empty());
        }

        let mut ids_of_x = HashSet::new();
        for block in function.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                instruction.each_store(|lvalue| {
                    if lvalue.place.identifier.name.as_deref() == Some("x") {
                        ids_of_x.insert(lvalue.place.identifier.id);
                    }
                });
                instruction.each_operand(|place| {
                    if place.identifier.name.as_deref() == Some("x") {
                        ids_of_x.insert(place.identifier.id);
                    }
                });
            }
        }
        assert_eq!(ids_of_x.len(), 1, "all versions fold back to one binding");
    }

    #[test]
    fn declaration_stays_let_and_branch_stores_stay_reassignments() {
        let mut function = compile_to_post_ssa(IF_ELSE_REASSIGN);

        let mut kinds = Vec::new();
        for block in function.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                if let InstructionValue::StoreLocal { lvalue, .. } = &instruction.value {
                    if lvalue.place.identifier.name.as_deref() == Some("x") {
                        kinds.push(lvalue.kind);
                    }
                }
            }
        }
        assert_eq!(
            kinds,
            vec![
                InstructionKind::Let,
                InstructionKind::Reassign,
                InstructionKind::Reassign
            ]
        );
    }

    #[test]
    fn never_reassigned_let_surfaces_as_const() {
        let mut function = compile_to_post_ssa(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "let",
                     "declarations": [{"id": {"name": "x"},
                                       "init": {"type": "MemberExpression",
                                                "object": {"type": "Identifier", "name": "props"},
                                                "property": {"type": "Identifier", "name": "x"}}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "x"}}
                ]}
            }"#,
        );

        let mut kinds = Vec::new();
        for block in function.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                if let InstructionValue::StoreLocal { lvalue, .. } = &instruction.value {
                    if lvalue.place.identifier.name.as_deref() == Some("x") {
                        kinds.push(lvalue.kind);
                    }
                }
            }
        }
        assert_eq!(kinds, vec![InstructionKind::Const]);
    }

    #[test]
    fn idempotent_across_a_second_round_trip() {
        let ast: ast::Function = serde_json::from_str(IF_ELSE_REASSIGN).unwrap();
        let env = Environment::new(Config::default()).unwrap();
        let mut function = lowering::lower(&env, &ast).unwrap();
        shape::reverse_postorder_blocks(&mut function);
        shape::mark_instruction_ids(&mut function);
        shape::mark_predecessors(&mut function);

        let versions = ssa::enter_ssa(&env, &mut function);
        ssa::eliminate_redundant_phi(&mut function);
        super::leave_ssa(&mut function, &versions);
        let first = crate::hir::print::print_function(&function);

        let versions = ssa::enter_ssa(&env, &mut function);
        ssa::eliminate_redundant_phi(&mut function);
        super::leave_ssa(&mut function, &versions);
        let second = crate::hir::print::print_function(&function);

        // Identifier ids differ between rounds; the shape does not.
        assert_eq!(
            normalize(&first),
            normalize(&second),
            "a second enter/leave round trip changes nothing"
        );
    }

    fn normalize(printed: &str) -> String {
        // Strip the numeric id suffix from `name$id` so renumbering between
        // rounds does not obscure structural differences.
        let mut out = String::new();
        let mut chars = printed.chars().peekable();
        while let Some(c) = chars.next() {
            out.push(c);
            if c == '$' || (c == 't' && out.ends_with('t')) {
                while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                    chars.next();
                }
            }
        }
        out
    }
}
