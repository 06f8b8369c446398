//! Scope merging. Alignment widens ranges independently, so two scopes can
//! end up covering overlapping statement runs; a statement cannot belong to
//! two memoization units. Overlapping scopes are folded into one: the
//! earlier scope absorbs the later one's range, declarations, and
//! reassignments, and every identifier pointing at an absorbed scope is
//! redirected. After this pass scope ranges within any one sequence are
//! pairwise disjoint, which scope-block insertion relies on.

use std::rc::Rc;

use hashbrown::{HashMap, HashSet};

use crate::{
    hir::{ScopeId, ScopeRef},
    reactive::{each_place, ReactiveFunction},
};

pub fn merge_overlapping_reactive_scopes(function: &mut ReactiveFunction) {
    let mut scopes: Vec<ScopeRef> = Vec::new();
    let mut seen: HashSet<ScopeId> = HashSet::new();
    each_place(&mut function.body, &mut |place| {
        if let Some(scope) = place.identifier.scope() {
            if seen.insert(scope.borrow().id) {
                scopes.push(scope);
            }
        }
    });
    scopes.sort_by_key(|scope| {
        let scope = scope.borrow();
        (scope.range.start, scope.id)
    });

    let mut redirect: HashMap<ScopeId, ScopeRef> = HashMap::new();
    let mut open: Option<ScopeRef> = None;
    for scope in scopes {
        let survivor = match &open {
            Some(survivor) if survivor.borrow().range.overlaps(&scope.borrow().range) => {
                Rc::clone(survivor)
            }
            _ => {
                open = Some(scope);
                continue;
            }
        };

        let absorbed = scope.borrow();
        let mut survivor_mut = survivor.borrow_mut();
        survivor_mut.range.end = survivor_mut.range.end.max(absorbed.range.end);
        survivor_mut.merged.insert(absorbed.id);
        survivor_mut.merged.extend(absorbed.merged.iter().copied());
        for (id, identifier) in &absorbed.declarations {
            survivor_mut.declarations.insert(*id, identifier.clone());
        }
        for reassignment in &absorbed.reassignments {
            if !survivor_mut
                .reassignments
                .iter()
                .any(|existing| existing.id == reassignment.id)
            {
                survivor_mut.reassignments.push(reassignment.clone());
            }
        }
        redirect.insert(absorbed.id, Rc::clone(&survivor));
    }

    if redirect.is_empty() {
        return;
    }
    each_place(&mut function.body, &mut |place| {
        let Some(scope) = place.identifier.scope() else {
            return;
        };
        let id = scope.borrow().id;
        if let Some(target) = redirect.get(&id) {
            place.identifier.data.borrow_mut().scope = Some(Rc::clone(target));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{align, build::tests::reactive};

    #[test]
    fn overlapping_scopes_collapse_into_one() {
        // Both arrays are conditionally pushed to inside the same `if`, so
        // alignment widens both scopes over the whole statement and they
        // overlap.
        let mut function = reactive(
            r#"{
                "params": [{"name": "cond"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "a"},
                                       "init": {"type": "ArrayExpression", "elements": []}}]},
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "b"},
                                       "init": {"type": "ArrayExpression", "elements": []}}]},
                    {"type": "IfStatement",
                     "test": {"type": "Identifier", "name": "cond"},
                     "consequent": {"type": "BlockStatement", "body": [
                        {"type": "ExpressionStatement",
                         "expression": {"type": "CallExpression",
                                        "callee": {"type": "MemberExpression",
                                                   "object": {"type": "Identifier", "name": "a"},
                                                   "property": {"type": "Identifier", "name": "push"}},
                                        "arguments": [{"type": "Literal", "value": 1.0}]}},
                        {"type": "ExpressionStatement",
                         "expression": {"type": "CallExpression",
                                        "callee": {"type": "MemberExpression",
                                                   "object": {"type": "Identifier", "name": "b"},
                                                   "property": {"type": "Identifier", "name": "push"}},
                                        "arguments": [{"type": "Literal", "value": 2.0}]}}
                     ]}},
                    {"type": "ReturnStatement",
                     "argument": {"type": "ArrayExpression",
                                  "elements": [{"type": "Identifier", "name": "a"},
                                               {"type": "Identifier", "name": "b"}]}}
                ]}
            }"#,
        );
        align::align_reactive_scopes_to_block_scopes(&mut function);
        merge_overlapping_reactive_scopes(&mut function);

        let mut seen: HashSet<ScopeId> = HashSet::new();
        let mut scopes: Vec<ScopeRef> = Vec::new();
        each_place(&mut function.body, &mut |place| {
            if let Some(scope) = place.identifier.scope() {
                if seen.insert(scope.borrow().id) {
                    scopes.push(scope);
                }
            }
        });
        for (i, left) in scopes.iter().enumerate() {
            for right in &scopes[i + 1..] {
                assert!(
                    !left.borrow().range.overlaps(&right.borrow().range),
                    "scopes {} and {} still overlap",
                    left.borrow().id,
                    right.borrow().id
                );
            }
        }
    }

    #[test]
    fn absorbed_scope_keeps_its_declarations() {
        let mut function = reactive(
            r#"{
                "params": [{"name": "cond"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "a"},
                                       "init": {"type": "ArrayExpression", "elements": []}}]},
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "b"},
                                       "init": {"type": "ArrayExpression", "elements": []}}]},
                    {"type": "IfStatement",
                     "test": {"type": "Identifier", "name": "cond"},
                     "consequent": {"type": "BlockStatement", "body": [
                        {"type": "ExpressionStatement",
                         "expression": {"type": "CallExpression",
                                        "callee": {"type": "MemberExpression",
                                                   "object": {"type": "Identifier", "name": "a"},
                                                   "property": {"type": "Identifier", "name": "push"}},
                                        "arguments": [{"type": "Identifier", "name": "b"}]}},
                        {"type": "ExpressionStatement",
                         "expression": {"type": "CallExpression",
                                        "callee": {"type": "MemberExpression",
                                                   "object": {"type": "Identifier", "name": "b"},
                                                   "property": {"type": "Identifier", "name": "push"}},
                                        "arguments": [{"type": "Literal", "value": 2.0}]}}
                     ]}},
                    {"type": "ReturnStatement",
                     "argument": {"type": "ArrayExpression",
                                  "elements": [{"type": "Identifier", "name": "a"},
                                               {"type": "Identifier", "name": "b"}]}}
                ]}
            }"#,
        );
        align::align_reactive_scopes_to_block_scopes(&mut function);
        merge_overlapping_reactive_scopes(&mut function);

        // `a` and `b` now share one scope that declares both.
        let mut shared = None;
        each_place(&mut function.body, &mut |place| {
            if matches!(place.identifier.name.as_deref(), Some("a") | Some("b")) {
                if let Some(scope) = place.identifier.scope() {
                    shared = Some(scope);
                }
            }
        });
        let scope = shared.expect("a and b are scoped");
        let scope = scope.borrow();
        let declared: Vec<_> = scope
            .declarations
            .values()
            .filter_map(|d| d.name.clone())
            .collect();
        assert!(declared.contains(&"a".to_owned()), "declared: {declared:?}");
        assert!(declared.contains(&"b".to_owned()), "declared: {declared:?}");
    }
}
