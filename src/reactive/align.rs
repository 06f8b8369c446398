//! Scope alignment. Mutable ranges are instruction intervals and routinely
//! start or stop in the middle of a statement subtree (inside one branch of
//! an `if`, halfway through a loop body). A scope block can only wrap whole
//! statements, so each scope's range is widened outward to the boundaries of
//! the statements it intersects. Widening can introduce overlap between
//! scopes that were disjoint; the merge pass resolves that next.

use hashbrown::HashSet;

use crate::{
    hir::{ScopeId, ScopeRef},
    index::Index,
    reactive::{statement_span, ReactiveFunction, ReactiveStatement, Span},
};

pub fn align_reactive_scopes_to_block_scopes(function: &mut ReactiveFunction) {
    align_block(&mut function.body);
}

fn align_block(block: &mut Vec<ReactiveStatement>) {
    let mut scopes: Vec<ScopeRef> = Vec::new();
    let mut seen: HashSet<ScopeId> = HashSet::new();
    for statement in block.iter_mut() {
        collect_scopes(statement, &mut scopes, &mut seen);
    }

    let spans: Vec<Span> = block.iter_mut().map(statement_span).collect();
    for scope in &scopes {
        let range = scope.borrow().range;
        let intersecting: Vec<&Span> = spans
            .iter()
            .filter(|span| span.intersects_range(&range))
            .collect();
        // A range inside a single statement is aligned (or simply owned) at
        // a deeper level; only a range straddling statements here widens.
        if intersecting.len() < 2 {
            continue;
        }
        let lo = intersecting[0].lo;
        let hi = intersecting[intersecting.len() - 1].hi;
        let mut scope = scope.borrow_mut();
        scope.range.start = scope.range.start.min(lo);
        scope.range.end = scope.range.end.max(hi.plus(1));
    }

    for statement in block.iter_mut() {
        match statement {
            ReactiveStatement::Terminal(terminal) => {
                terminal.terminal.each_block(align_block);
            }
            ReactiveStatement::Scope(scope_block) => align_block(&mut scope_block.body),
            ReactiveStatement::Instruction(_) => {}
        }
    }
}

fn collect_scopes(
    statement: &mut ReactiveStatement,
    out: &mut Vec<ScopeRef>,
    seen: &mut HashSet<ScopeId>,
) {
    match statement {
        ReactiveStatement::Instruction(instruction) => {
            let mut push = |scope: Option<ScopeRef>| {
                if let Some(scope) = scope {
                    if seen.insert(scope.borrow().id) {
                        out.push(scope);
                    }
                }
            };
            push(instruction.lvalue.identifier.scope());
            instruction.each_store(|lvalue| push(lvalue.place.identifier.scope()));
        }
        ReactiveStatement::Terminal(terminal) => {
            terminal.terminal.each_block(|nested| {
                for statement in nested {
                    collect_scopes(statement, out, seen);
                }
            });
        }
        ReactiveStatement::Scope(scope_block) => {
            for statement in &mut scope_block.body {
                collect_scopes(statement, out, seen);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::build::tests::reactive;

    fn all_scopes(block: &mut Vec<ReactiveStatement>) -> Vec<ScopeRef> {
        let mut scopes = Vec::new();
        let mut seen = HashSet::new();
        for statement in block.iter_mut() {
            collect_scopes(statement, &mut scopes, &mut seen);
        }
        scopes
    }

    #[test]
    fn straddling_scope_widens_to_statement_boundaries() {
        // `x` is created before the `if` and conditionally mutated inside
        // it, so its raw range ends mid-branch; after alignment the range
        // must cover the whole `if` statement.
        let mut function = reactive(
            r#"{
                "params": [{"name": "cond"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "x"},
                                       "init": {"type": "ArrayExpression", "elements": []}}]},
                    {"type": "IfStatement",
                     "test": {"type": "Identifier", "name": "cond"},
                     "consequent": {"type": "ExpressionStatement",
                                    "expression": {"type": "CallExpression",
                                                   "callee": {"type": "MemberExpression",
                                                              "object": {"type": "Identifier", "name": "x"},
                                                              "property": {"type": "Identifier", "name": "push"}},
                                                   "arguments": [{"type": "Literal", "value": 1.0}]}}},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "x"}}
                ]}
            }"#,
        );
        align_reactive_scopes_to_block_scopes(&mut function);

        let scopes = all_scopes(&mut function.body);
        let x_scope = scopes
            .iter()
            .find(|scope| {
                scope
                    .borrow()
                    .declarations
                    .values()
                    .any(|d| d.name.as_deref() == Some("x"))
            })
            .expect("x has a scope")
            .clone();
        let range = x_scope.borrow().range;

        let spans: Vec<Span> = function.body.iter_mut().map(statement_span).collect();
        for span in spans {
            let intersects = span.intersects_range(&range);
            let contained = range.start <= span.lo && span.hi < range.end;
            assert!(
                !intersects || contained,
                "scope range {range:?} cuts through statement span {span:?}"
            );
        }
    }

    #[test]
    fn scope_inside_one_statement_is_left_alone() {
        let mut function = reactive(
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
        let before: Vec<_> = all_scopes(&mut function.body)
            .iter()
            .map(|scope| scope.borrow().range)
            .collect();
        align_reactive_scopes_to_block_scopes(&mut function);
        let after: Vec<_> = all_scopes(&mut function.body)
            .iter()
            .map(|scope| scope.borrow().range)
            .collect();
        assert_eq!(before, after);
    }
}
