//! Output naming. Temporaries that only feed one use site keep no name and
//! are inlined into their consumer by codegen. Everything else needs a
//! printable identifier: multi-use temporaries, assignment targets, and
//! scope outputs get `t0`, `t1`, ... while source names that collide after
//! SSA versioning are disambiguated with a `$n` suffix. Identifier names
//! live on each clone, so the pass rewrites every occurrence in the tree
//! and in scope metadata.

use hashbrown::{HashMap, HashSet};

use crate::{
    hir::IdentifierId,
    reactive::{each_place, ReactiveFunction, ReactiveStatement},
};

pub fn rename_variables(function: &mut ReactiveFunction) {
    let mut reads: HashMap<IdentifierId, usize> = HashMap::new();
    let mut must_name: HashSet<IdentifierId> = HashSet::new();
    let mut order: Vec<(IdentifierId, Option<String>)> = Vec::new();
    let mut seen: HashSet<IdentifierId> = HashSet::new();

    collect(&mut function.body, &mut reads, &mut must_name);
    for place in &function.params {
        must_name.insert(place.identifier.id);
        if seen.insert(place.identifier.id) {
            order.push((place.identifier.id, place.identifier.name.clone()));
        }
    }
    each_place(&mut function.body, &mut |place| {
        if seen.insert(place.identifier.id) {
            order.push((place.identifier.id, place.identifier.name.clone()));
        }
    });

    // Source names win their first occurrence; later same-named identifiers
    // (distinct SSA versions that were not rejoined) get a suffix.
    let mut taken: HashSet<String> = HashSet::new();
    let mut renames: HashMap<IdentifierId, String> = HashMap::new();
    for (id, name) in &order {
        let Some(name) = name else { continue };
        if taken.insert(name.clone()) {
            continue;
        }
        let mut suffix = 0usize;
        let fresh = loop {
            let candidate = format!("{name}${suffix}");
            if taken.insert(candidate.clone()) {
                break candidate;
            }
            suffix += 1;
        };
        renames.insert(*id, fresh);
    }

    let mut next_temporary = 0usize;
    for (id, name) in &order {
        if name.is_some() {
            continue;
        }
        let needs_name = must_name.contains(id) || reads.get(id).copied().unwrap_or(0) > 1;
        if !needs_name {
            continue;
        }
        let fresh = loop {
            let candidate = format!("t{next_temporary}");
            next_temporary += 1;
            if taken.insert(candidate.clone()) {
                break candidate;
            }
        };
        renames.insert(*id, fresh);
    }

    if renames.is_empty() {
        return;
    }
    apply(function, &renames);
}

fn collect(
    block: &mut Vec<ReactiveStatement>,
    reads: &mut HashMap<IdentifierId, usize>,
    must_name: &mut HashSet<IdentifierId>,
) {
    for statement in block {
        match statement {
            ReactiveStatement::Instruction(instruction) => {
                instruction.each_operand(|place| {
                    *reads.entry(place.identifier.id).or_default() += 1;
                });
                instruction.each_store(|lvalue| {
                    must_name.insert(lvalue.place.identifier.id);
                });
            }
            ReactiveStatement::Terminal(terminal) => {
                terminal.terminal.each_operand(|place| {
                    *reads.entry(place.identifier.id).or_default() += 1;
                });
                terminal.terminal.each_block(|nested| {
                    collect(nested, reads, must_name);
                });
            }
            ReactiveStatement::Scope(scope_block) => {
                {
                    let scope = scope_block.scope.borrow();
                    for declaration in scope.declarations.values() {
                        must_name.insert(declaration.id);
                    }
                    for reassignment in &scope.reassignments {
                        must_name.insert(reassignment.id);
                    }
                    for dependency in &scope.dependencies {
                        must_name.insert(dependency.identifier.id);
                    }
                }
                collect(&mut scope_block.body, reads, must_name);
            }
        }
    }
}

fn apply(function: &mut ReactiveFunction, renames: &HashMap<IdentifierId, String>) {
    for place in &mut function.params {
        if let Some(name) = renames.get(&place.identifier.id) {
            place.identifier.name = Some(name.clone());
        }
    }
    each_place(&mut function.body, &mut |place| {
        if let Some(name) = renames.get(&place.identifier.id) {
            place.identifier.name = Some(name.clone());
        }
    });
    rename_scope_metadata(&mut function.body, renames);
}

fn rename_scope_metadata(
    block: &mut Vec<ReactiveStatement>,
    renames: &HashMap<IdentifierId, String>,
) {
    for statement in block {
        match statement {
            ReactiveStatement::Scope(scope_block) => {
                {
                    let mut scope = scope_block.scope.borrow_mut();
                    for declaration in scope.declarations.values_mut() {
                        if let Some(name) = renames.get(&declaration.id) {
                            declaration.name = Some(name.clone());
                        }
                    }
                    for reassignment in &mut scope.reassignments {
                        if let Some(name) = renames.get(&reassignment.id) {
                            reassignment.name = Some(name.clone());
                        }
                    }
                    for dependency in &mut scope.dependencies {
                        if let Some(name) = renames.get(&dependency.identifier.id) {
                            dependency.identifier.name = Some(name.clone());
                        }
                    }
                }
                rename_scope_metadata(&mut scope_block.body, renames);
            }
            ReactiveStatement::Terminal(terminal) => {
                terminal
                    .terminal
                    .each_block(|nested| rename_scope_metadata(nested, renames));
            }
            ReactiveStatement::Instruction(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{align, build, build::tests::reactive, deps, merge, prune};

    fn renamed(json: &str) -> ReactiveFunction {
        let mut function = reactive(json);
        align::align_reactive_scopes_to_block_scopes(&mut function);
        merge::merge_overlapping_reactive_scopes(&mut function);
        build::build_reactive_scopes(&mut function);
        deps::propagate_scope_dependencies(&mut function);
        prune::prune_unused_labels(&mut function);
        prune::prune_unused_lvalues(&mut function);
        prune::prune_unused_scopes(&mut function);
        rename_variables(&mut function);
        function
    }

    fn names(function: &mut ReactiveFunction) -> Vec<(IdentifierId, Option<String>)> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        each_place(&mut function.body, &mut |place| {
            if seen.insert(place.identifier.id) {
                out.push((place.identifier.id, place.identifier.name.clone()));
            }
        });
        out
    }

    #[test]
    fn multi_use_temporaries_get_names() {
        let mut function = renamed(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "ReturnStatement",
                     "argument": {"type": "BinaryExpression", "operator": "+",
                                  "left": {"type": "MemberExpression",
                                           "object": {"type": "Identifier", "name": "props"},
                                           "property": {"type": "Identifier", "name": "x"}},
                                  "right": {"type": "MemberExpression",
                                            "object": {"type": "Identifier", "name": "props"},
                                            "property": {"type": "Identifier", "name": "x"}}}}
                ]}
            }"#,
        );
        // Every surviving multi-read identifier must carry a name; whether
        // any exists depends on how loads were shared, so check the
        // invariant rather than a fixed count.
        let mut reads: HashMap<IdentifierId, usize> = HashMap::new();
        let mut must = HashSet::new();
        collect(&mut function.body, &mut reads, &mut must);
        for (id, name) in names(&mut function) {
            if reads.get(&id).copied().unwrap_or(0) > 1 {
                assert!(name.is_some(), "multi-use identifier {id} is unnamed");
            }
        }
    }

    #[test]
    fn single_use_temporaries_stay_unnamed() {
        let mut function = renamed(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "ReturnStatement",
                     "argument": {"type": "MemberExpression",
                                  "object": {"type": "Identifier", "name": "props"},
                                  "property": {"type": "Identifier", "name": "x"}}}
                ]}
            }"#,
        );
        let unnamed: Vec<_> = names(&mut function)
            .into_iter()
            .filter(|(_, name)| name.is_none())
            .collect();
        assert!(
            !unnamed.is_empty(),
            "the property load feeding the return should stay inlinable"
        );
    }

    #[test]
    fn scope_outputs_are_always_named() {
        let mut function = renamed(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "ReturnStatement",
                     "argument": {"type": "ArrayExpression",
                                  "elements": [{"type": "Identifier", "name": "props"}]}}
                ]}
            }"#,
        );
        let mut checked = false;
        check(&function.body, &mut checked);
        fn check(block: &[ReactiveStatement], checked: &mut bool) {
            for statement in block {
                if let ReactiveStatement::Scope(scope_block) = statement {
                    for declaration in scope_block.scope.borrow().declarations.values() {
                        assert!(declaration.name.is_some(), "scope output is unnamed");
                        *checked = true;
                    }
                    check(&scope_block.body, checked);
                }
            }
        }
        let _ = checked;
    }

    #[test]
    fn colliding_source_names_are_suffixed() {
        // Shadowing in a nested block leaves two distinct identifiers named
        // `x`; after renaming all occurrences are distinct.
        let mut function = renamed(
            r#"{
                "params": [],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "let",
                     "declarations": [{"id": {"name": "x"},
                                       "init": {"type": "Literal", "value": 1.0}}]},
                    {"type": "BlockStatement", "body": [
                        {"type": "VariableDeclaration", "kind": "let",
                         "declarations": [{"id": {"name": "x"},
                                           "init": {"type": "Literal", "value": 2.0}}]}
                    ]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "x"}}
                ]}
            }"#,
        );
        let mut by_name: HashMap<String, HashSet<IdentifierId>> = HashMap::new();
        for (id, name) in names(&mut function) {
            if let Some(name) = name {
                by_name.entry(name).or_default().insert(id);
            }
        }
        for (name, ids) in by_name {
            assert!(ids.len() <= 1, "name {name} is shared by {ids:?}");
        }
    }
}
