//! Structure recovery: rebuilds the nested statement tree from the flat CFG,
//! the dual of lowering. Fallthrough blocks re-attach to the terminal that
//! owns them, loop tests and short-circuit right-hand sides collapse back
//! into value sequences, and gotos resolve to break/continue statements
//! against a stack of jump targets. `build_reactive_scopes` runs separately,
//! after alignment and merging, wrapping each scope's statement run into a
//! scope block.

use hashbrown::HashSet;

use crate::{
    diagnostics::{CompilerError, SourceLocation},
    hir::{
        BlockId, HIRFunction, InstructionId, Place, ScopeId, ScopeRef, Terminal, TerminalValue,
    },
    index::OrderedMap,
    reactive::{
        block_span, statement_span, ReactiveFunction, ReactiveScopeBlock, ReactiveStatement,
        ReactiveTerminal, ReactiveTerminalStatement,
    },
};

pub fn build_reactive_function(
    function: HIRFunction,
) -> Result<ReactiveFunction, CompilerError> {
    let HIRFunction {
        loc,
        name,
        params,
        context: _,
        body,
        is_async,
        is_generator,
    } = function;

    let mut builder = Builder {
        blocks: body.blocks,
        frames: Vec::new(),
    };
    let statements = builder.build_block(body.entry)?;

    Ok(ReactiveFunction {
        loc,
        name,
        params,
        body: statements,
        is_async,
        is_generator,
    })
}

/// Where a goto may land and what statement that landing means.
#[derive(Debug, Clone, Copy)]
struct Frame {
    target: BlockId,
    kind: FrameKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    /// Jumping here leaves a loop.
    LoopBreak { label: BlockId },
    /// Jumping here re-enters a loop's test or update.
    LoopContinue { label: BlockId },
    /// Jumping here leaves a labeled block.
    LabelBreak { label: BlockId },
    /// The natural continuation of a construct; jumping here emits nothing.
    Fallthrough,
}

enum Jump {
    /// The goto is a break or continue.
    Statement(ReactiveTerminal),
    /// The goto is a construct's own natural exit.
    End,
    /// The goto is straight-line flow into the next block.
    Chain,
}

struct Builder {
    blocks: OrderedMap<BlockId, crate::hir::BasicBlock>,
    frames: Vec<Frame>,
}

impl Builder {
    fn take(&mut self, id: BlockId) -> Result<crate::hir::BasicBlock, CompilerError> {
        self.blocks.remove(id).ok_or_else(|| {
            CompilerError::invariant(
                format!("block bb{id} reached twice during structure recovery"),
                None,
            )
        })
    }

    fn resolve_jump(&self, target: BlockId) -> Jump {
        for (position, frame) in self.frames.iter().enumerate().rev() {
            if frame.target != target {
                continue;
            }
            return match frame.kind {
                FrameKind::Fallthrough => Jump::End,
                FrameKind::LoopBreak { label } => Jump::Statement(ReactiveTerminal::Break {
                    label: (!self.is_innermost_loop_break(position)).then_some(label),
                }),
                FrameKind::LoopContinue { label } => {
                    Jump::Statement(ReactiveTerminal::Continue {
                        label: (!self.is_innermost_loop_continue(position)).then_some(label),
                    })
                }
                FrameKind::LabelBreak { label } => {
                    Jump::Statement(ReactiveTerminal::Break { label: Some(label) })
                }
            };
        }
        Jump::Chain
    }

    /// An unlabeled `break` targets the innermost loop, skipping labeled
    /// blocks in between; the label is only needed when the matched frame is
    /// not that loop.
    fn is_innermost_loop_break(&self, position: usize) -> bool {
        self.frames
            .iter()
            .rposition(|f| matches!(f.kind, FrameKind::LoopBreak { .. }))
            == Some(position)
    }

    fn is_innermost_loop_continue(&self, position: usize) -> bool {
        self.frames
            .iter()
            .rposition(|f| matches!(f.kind, FrameKind::LoopContinue { .. }))
            == Some(position)
    }

    fn build_block(&mut self, start: BlockId) -> Result<Vec<ReactiveStatement>, CompilerError> {
        let mut statements = Vec::new();
        let mut current = start;
        loop {
            let block = self.take(current)?;
            statements.extend(block.instructions.into_iter().map(ReactiveStatement::Instruction));
            let Terminal { id, value, loc } = block.terminal;

            match value {
                TerminalValue::Goto { block: target, .. } => match self.resolve_jump(target) {
                    Jump::Statement(terminal) => {
                        statements.push(terminal_statement(id, terminal, loc));
                        return Ok(statements);
                    }
                    Jump::End => return Ok(statements),
                    Jump::Chain => {
                        if !self.blocks.contains_key(target) {
                            return Err(CompilerError::invariant(
                                format!("goto target bb{target} is not available"),
                                Some(loc),
                            ));
                        }
                        current = target;
                    }
                },
                TerminalValue::Return { value } => {
                    statements.push(terminal_statement(
                        id,
                        ReactiveTerminal::Return { value },
                        loc,
                    ));
                    return Ok(statements);
                }
                TerminalValue::Throw { value } => {
                    statements.push(terminal_statement(id, ReactiveTerminal::Throw { value }, loc));
                    return Ok(statements);
                }
                TerminalValue::If {
                    test,
                    consequent,
                    alternate,
                    fallthrough,
                } => match fallthrough {
                    Some(fallthrough) => {
                        self.frames.push(Frame {
                            target: fallthrough,
                            kind: FrameKind::Fallthrough,
                        });
                        let consequent = self.build_block(consequent)?;
                        let alternate = if alternate == fallthrough {
                            None
                        } else {
                            Some(self.build_block(alternate)?)
                        };
                        self.frames.pop();
                        statements.push(terminal_statement(
                            id,
                            ReactiveTerminal::If {
                                test,
                                consequent,
                                alternate,
                            },
                            loc,
                        ));
                        current = fallthrough;
                    }
                    None => {
                        // Both branches terminate abruptly; there is no
                        // continuation to chain into.
                        let consequent = self.build_block(consequent)?;
                        let alternate = Some(self.build_block(alternate)?);
                        statements.push(terminal_statement(
                            id,
                            ReactiveTerminal::If {
                                test,
                                consequent,
                                alternate,
                            },
                            loc,
                        ));
                        return Ok(statements);
                    }
                },
                TerminalValue::Logical {
                    operator,
                    test,
                    rhs,
                    fallthrough,
                } => {
                    self.frames.push(Frame {
                        target: fallthrough,
                        kind: FrameKind::Fallthrough,
                    });
                    let rhs = self.build_block(rhs)?;
                    self.frames.pop();
                    statements.push(terminal_statement(
                        id,
                        ReactiveTerminal::Logical {
                            operator,
                            test,
                            rhs,
                        },
                        loc,
                    ));
                    current = fallthrough;
                }
                TerminalValue::Ternary {
                    test,
                    consequent,
                    alternate,
                    fallthrough,
                } => {
                    self.frames.push(Frame {
                        target: fallthrough,
                        kind: FrameKind::Fallthrough,
                    });
                    let consequent = self.build_block(consequent)?;
                    let alternate = self.build_block(alternate)?;
                    self.frames.pop();
                    statements.push(terminal_statement(
                        id,
                        ReactiveTerminal::Ternary {
                            test,
                            consequent,
                            alternate,
                        },
                        loc,
                    ));
                    current = fallthrough;
                }
                TerminalValue::While {
                    test,
                    body,
                    fallthrough,
                } => {
                    let (test_statements, test_value) =
                        self.build_test_chain(test, body, fallthrough)?;
                    self.frames.push(Frame {
                        target: fallthrough,
                        kind: FrameKind::LoopBreak { label: fallthrough },
                    });
                    self.frames.push(Frame {
                        target: test,
                        kind: FrameKind::LoopContinue { label: fallthrough },
                    });
                    let body = self.build_block(body)?;
                    self.frames.pop();
                    self.frames.pop();
                    statements.push(labeled_terminal_statement(
                        id,
                        fallthrough,
                        ReactiveTerminal::While {
                            test: test_statements,
                            test_value,
                            body,
                        },
                        loc,
                    ));
                    current = fallthrough;
                }
                TerminalValue::DoWhile {
                    body,
                    test,
                    fallthrough,
                } => {
                    self.frames.push(Frame {
                        target: fallthrough,
                        kind: FrameKind::LoopBreak { label: fallthrough },
                    });
                    self.frames.push(Frame {
                        target: test,
                        kind: FrameKind::LoopContinue { label: fallthrough },
                    });
                    let body_id = body;
                    let body = self.build_block(body)?;
                    self.frames.pop();
                    self.frames.pop();
                    let (test_statements, test_value) =
                        self.build_test_chain(test, body_id, fallthrough)?;
                    statements.push(labeled_terminal_statement(
                        id,
                        fallthrough,
                        ReactiveTerminal::DoWhile {
                            body,
                            test: test_statements,
                            test_value,
                        },
                        loc,
                    ));
                    current = fallthrough;
                }
                TerminalValue::For {
                    init,
                    test,
                    update,
                    body,
                    fallthrough,
                } => {
                    self.frames.push(Frame {
                        target: test,
                        kind: FrameKind::Fallthrough,
                    });
                    let init = self.build_block(init)?;
                    self.frames.pop();

                    let (test_statements, test_value) =
                        self.build_test_chain(test, body, fallthrough)?;

                    let continue_target = update.unwrap_or(test);
                    self.frames.push(Frame {
                        target: fallthrough,
                        kind: FrameKind::LoopBreak { label: fallthrough },
                    });
                    self.frames.push(Frame {
                        target: continue_target,
                        kind: FrameKind::LoopContinue { label: fallthrough },
                    });
                    let body = self.build_block(body)?;
                    self.frames.pop();
                    self.frames.pop();

                    let update_statements = match update {
                        Some(update) => {
                            self.frames.push(Frame {
                                target: test,
                                kind: FrameKind::Fallthrough,
                            });
                            let update = self.build_block(update)?;
                            self.frames.pop();
                            update
                        }
                        None => Vec::new(),
                    };

                    statements.push(labeled_terminal_statement(
                        id,
                        fallthrough,
                        ReactiveTerminal::For {
                            init,
                            test: test_statements,
                            test_value,
                            update: update_statements,
                            body,
                        },
                        loc,
                    ));
                    current = fallthrough;
                }
                TerminalValue::Label { block, fallthrough } => {
                    let fallthrough = fallthrough.ok_or_else(|| {
                        CompilerError::invariant(
                            "labeled block terminal is missing its fallthrough",
                            Some(loc.clone()),
                        )
                    })?;
                    self.frames.push(Frame {
                        target: fallthrough,
                        kind: FrameKind::LabelBreak { label: fallthrough },
                    });
                    let body = self.build_block(block)?;
                    self.frames.pop();
                    statements.push(labeled_terminal_statement(
                        id,
                        fallthrough,
                        ReactiveTerminal::Label { body },
                        loc,
                    ));
                    current = fallthrough;
                }
                TerminalValue::Try {
                    block,
                    handler,
                    handler_param,
                    fallthrough,
                } => {
                    self.frames.push(Frame {
                        target: fallthrough,
                        kind: FrameKind::Fallthrough,
                    });
                    let body = self.build_block(block)?;
                    let handler = self.build_block(handler)?;
                    self.frames.pop();
                    statements.push(terminal_statement(
                        id,
                        ReactiveTerminal::Try {
                            body,
                            handler_param,
                            handler,
                        },
                        loc,
                    ));
                    current = fallthrough;
                }
                TerminalValue::Unsupported => {
                    return Err(CompilerError::invariant(
                        "unsupported terminal survived into structure recovery",
                        Some(loc),
                    ));
                }
            }
        }
    }

    /// Consumes the straight-line chain computing a loop condition, ending at
    /// the branch into the loop body. Returns the chain's statements and the
    /// condition place.
    fn build_test_chain(
        &mut self,
        start: BlockId,
        body: BlockId,
        exit: BlockId,
    ) -> Result<(Vec<ReactiveStatement>, Place), CompilerError> {
        let mut statements = Vec::new();
        let mut current = start;
        loop {
            let block = self.take(current)?;
            statements.extend(block.instructions.into_iter().map(ReactiveStatement::Instruction));
            let Terminal { id, value, loc } = block.terminal;
            match value {
                TerminalValue::If {
                    test,
                    consequent,
                    alternate,
                    ..
                } if consequent == body && alternate == exit => {
                    return Ok((statements, test));
                }
                TerminalValue::Goto { block: target, .. } => current = target,
                TerminalValue::Logical {
                    operator,
                    test,
                    rhs,
                    fallthrough,
                } => {
                    self.frames.push(Frame {
                        target: fallthrough,
                        kind: FrameKind::Fallthrough,
                    });
                    let rhs = self.build_block(rhs)?;
                    self.frames.pop();
                    statements.push(terminal_statement(
                        id,
                        ReactiveTerminal::Logical {
                            operator,
                            test,
                            rhs,
                        },
                        loc,
                    ));
                    current = fallthrough;
                }
                TerminalValue::Ternary {
                    test,
                    consequent,
                    alternate,
                    fallthrough,
                } => {
                    self.frames.push(Frame {
                        target: fallthrough,
                        kind: FrameKind::Fallthrough,
                    });
                    let consequent = self.build_block(consequent)?;
                    let alternate = self.build_block(alternate)?;
                    self.frames.pop();
                    statements.push(terminal_statement(
                        id,
                        ReactiveTerminal::Ternary {
                            test,
                            consequent,
                            alternate,
                        },
                        loc,
                    ));
                    current = fallthrough;
                }
                _ => {
                    return Err(CompilerError::invariant(
                        "loop test did not reduce to a condition",
                        Some(loc),
                    ));
                }
            }
        }
    }
}

fn terminal_statement(
    id: InstructionId,
    terminal: ReactiveTerminal,
    loc: SourceLocation,
) -> ReactiveStatement {
    ReactiveStatement::Terminal(ReactiveTerminalStatement {
        id,
        label: None,
        terminal,
        loc,
    })
}

fn labeled_terminal_statement(
    id: InstructionId,
    label: BlockId,
    terminal: ReactiveTerminal,
    loc: SourceLocation,
) -> ReactiveStatement {
    ReactiveStatement::Terminal(ReactiveTerminalStatement {
        id,
        label: Some(label),
        terminal,
        loc,
    })
}

/* Scope-block insertion */

/// Wraps each scope's statement run into a `ReactiveScopeBlock`. Runs after
/// alignment widened scope ranges to statement boundaries and merging
/// removed overlaps, so within one sequence the runs are disjoint.
pub fn build_reactive_scopes(function: &mut ReactiveFunction) {
    let mut wrapped = HashSet::new();
    insert_scopes(&mut function.body, &mut wrapped);
}

fn insert_scopes(block: &mut Vec<ReactiveStatement>, wrapped: &mut HashSet<ScopeId>) {
    // Children first: a scope wholly inside a nested sequence is wrapped at
    // that level and recorded, so this level skips it.
    for statement in block.iter_mut() {
        match statement {
            ReactiveStatement::Terminal(terminal) => {
                terminal
                    .terminal
                    .each_block(|nested| insert_scopes(nested, wrapped));
            }
            ReactiveStatement::Scope(scope_block) => {
                insert_scopes(&mut scope_block.body, wrapped);
            }
            ReactiveStatement::Instruction(_) => {}
        }
    }

    let Some(sequence_span) = block_span(block) else {
        return;
    };

    loop {
        let mut chosen: Option<ScopeRef> = None;
        'search: for statement in block.iter_mut() {
            let mut found = Vec::new();
            statement_scopes(statement, &mut found);
            for scope in found {
                let (id, range) = {
                    let scope = scope.borrow();
                    (scope.id, scope.range)
                };
                if wrapped.contains(&id) {
                    continue;
                }
                if !sequence_span.contains_range(&range) {
                    // Straddles this sequence; an outer level owns it.
                    continue;
                }
                chosen = Some(scope);
                break 'search;
            }
        }

        let Some(scope) = chosen else {
            return;
        };
        let (scope_id, range) = {
            let scope = scope.borrow();
            (scope.id, scope.range)
        };

        // The run extends over every statement the range intersects.
        let mut bounds: Option<(usize, usize)> = None;
        for (index, statement) in block.iter_mut().enumerate() {
            if statement_span(statement).intersects_range(&range) {
                bounds = Some(match bounds {
                    Some((start, _)) => (start, index),
                    None => (index, index),
                });
            }
        }
        wrapped.insert(scope_id);
        let Some((start, end)) = bounds else {
            continue;
        };

        let body: Vec<ReactiveStatement> = block.drain(start..=end).collect();
        block.insert(
            start,
            ReactiveStatement::Scope(ReactiveScopeBlock { scope, body }),
        );
    }
}

/// Collects the scopes of identifiers a statement subtree defines or stores
/// to, skipping subtrees already wrapped in a scope block.
fn statement_scopes(statement: &mut ReactiveStatement, out: &mut Vec<ScopeRef>) {
    match statement {
        ReactiveStatement::Instruction(instruction) => {
            if let Some(scope) = instruction.lvalue.identifier.scope() {
                out.push(scope);
            }
            instruction.each_store(|lvalue| {
                if let Some(scope) = lvalue.place.identifier.scope() {
                    out.push(scope);
                }
            });
        }
        ReactiveStatement::Terminal(terminal) => {
            terminal.terminal.each_block(|nested| {
                for statement in nested {
                    statement_scopes(statement, out);
                }
            });
        }
        ReactiveStatement::Scope(_) => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        ast,
        environment::{Config, Environment},
        hir::lowering,
        hir::shape,
        inference::{effects, ranges},
        reactive::scopes,
        ssa,
    };

    pub(crate) fn reactive(json: &str) -> ReactiveFunction {
        let ast: ast::Function = serde_json::from_str(json).unwrap();
        let env = Environment::new(Config::default()).unwrap();
        let mut function = lowering::lower(&env, &ast).unwrap();
        shape::reverse_postorder_blocks(&mut function);
        shape::mark_instruction_ids(&mut function);
        shape::mark_predecessors(&mut function);
        shape::merge_consecutive_blocks(&mut function);
        shape::mark_predecessors(&mut function);
        shape::mark_instruction_ids(&mut function);
        let versions = ssa::enter_ssa(&env, &mut function);
        ssa::eliminate_redundant_phi(&mut function);
        let kinds = effects::infer_reference_effects(&env, &mut function);
        ranges::infer_mutable_ranges(&mut function, &kinds);
        ssa::leave::leave_ssa(&mut function, &versions);
        scopes::infer_reactive_scope_variables(&env, &mut function);
        build_reactive_function(function).unwrap()
    }

    fn count_terminals(block: &[ReactiveStatement]) -> usize {
        block
            .iter()
            .map(|statement| match statement {
                ReactiveStatement::Terminal(terminal) => {
                    let mut inner = 1;
                    let mut nested_count = 0;
                    // Immutable traversal for counting.
                    let _ = &terminal.terminal;
                    if let ReactiveTerminal::If {
                        consequent,
                        alternate,
                        ..
                    } = &terminal.terminal
                    {
                        nested_count += count_terminals(consequent);
                        if let Some(alternate) = alternate {
                            nested_count += count_terminals(alternate);
                        }
                    }
                    inner += nested_count;
                    inner
                }
                ReactiveStatement::Scope(scope_block) => count_terminals(&scope_block.body),
                ReactiveStatement::Instruction(_) => 0,
            })
            .sum()
    }

    #[test]
    fn if_else_rebuilds_as_nested_branches() {
        let function = reactive(
            r#"{
                "params": [{"name": "cond"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "let",
                     "declarations": [{"id": {"name": "x"},
                                       "init": {"type": "Literal", "value": 0.0}}]},
                    {"type": "IfStatement",
                     "test": {"type": "Identifier", "name": "cond"},
                     "consequent": {"type": "ExpressionStatement",
                                    "expression": {"type": "AssignmentExpression", "operator": "=",
                                                   "left": {"type": "Identifier", "name": "x"},
                                                   "right": {"type": "Literal", "value": 1.0}}},
                     "alternate": {"type": "ExpressionStatement",
                                   "expression": {"type": "AssignmentExpression", "operator": "=",
                                                  "left": {"type": "Identifier", "name": "x"},
                                                  "right": {"type": "Literal", "value": 2.0}}}},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "x"}}
                ]}
            }"#,
        );
        let if_statement = function.body.iter().find_map(|statement| match statement {
            ReactiveStatement::Terminal(t) => match &t.terminal {
                ReactiveTerminal::If {
                    consequent,
                    alternate,
                    ..
                } => Some((consequent.len(), alternate.as_ref().map(Vec::len))),
                _ => None,
            },
            _ => None,
        });
        let (consequent_len, alternate_len) = if_statement.expect("if statement was rebuilt");
        assert!(consequent_len >= 1);
        assert!(alternate_len.is_some());
    }

    #[test]
    fn while_loop_rebuilds_with_test_and_body() {
        let function = reactive(
            r#"{
                "params": [{"name": "n"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "let",
                     "declarations": [{"id": {"name": "i"},
                                       "init": {"type": "Literal", "value": 0.0}}]},
                    {"type": "WhileStatement",
                     "test": {"type": "BinaryExpression", "operator": "<",
                              "left": {"type": "Identifier", "name": "i"},
                              "right": {"type": "Identifier", "name": "n"}},
                     "body": {"type": "ExpressionStatement",
                              "expression": {"type": "UpdateExpression",
                                             "operator": "++", "prefix": true,
                                             "argument": {"type": "Identifier", "name": "i"}}}},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "i"}}
                ]}
            }"#,
        );
        let found = find_while(&function.body);
        let (test_len, body_len) = found.expect("while was rebuilt");
        assert!(test_len >= 1, "test chain has the comparison instructions");
        assert!(body_len >= 1, "body has the increment");
    }

    fn find_while(block: &[ReactiveStatement]) -> Option<(usize, usize)> {
        for statement in block {
            match statement {
                ReactiveStatement::Terminal(t) => {
                    if let ReactiveTerminal::While { test, body, .. } = &t.terminal {
                        return Some((test.len(), body.len()));
                    }
                }
                ReactiveStatement::Scope(scope_block) => {
                    if let Some(found) = find_while(&scope_block.body) {
                        return Some(found);
                    }
                }
                ReactiveStatement::Instruction(_) => {}
            }
        }
        None
    }

    #[test]
    fn break_inside_loop_resolves_without_label() {
        let function = reactive(
            r#"{
                "params": [{"name": "n"}],
                "body": {"body": [
                    {"type": "WhileStatement",
                     "test": {"type": "Literal", "value": true},
                     "body": {"type": "BlockStatement", "body": [
                        {"type": "IfStatement",
                         "test": {"type": "Identifier", "name": "n"},
                         "consequent": {"type": "BreakStatement"}}
                     ]}},
                    {"type": "ReturnStatement"}
                ]}
            }"#,
        );
        let mut saw_unlabeled_break = false;
        check_breaks(&function.body, &mut saw_unlabeled_break);
        assert!(saw_unlabeled_break);

        fn check_breaks(block: &[ReactiveStatement], saw: &mut bool) {
            for statement in block {
                match statement {
                    ReactiveStatement::Terminal(t) => {
                        if let ReactiveTerminal::Break { label: None } = &t.terminal {
                            *saw = true;
                        }
                        match &t.terminal {
                            ReactiveTerminal::If {
                                consequent,
                                alternate,
                                ..
                            } => {
                                check_breaks(consequent, saw);
                                if let Some(alternate) = alternate {
                                    check_breaks(alternate, saw);
                                }
                            }
                            ReactiveTerminal::While { test, body, .. } => {
                                check_breaks(test, saw);
                                check_breaks(body, saw);
                            }
                            _ => {}
                        }
                    }
                    ReactiveStatement::Scope(scope_block) => check_breaks(&scope_block.body, saw),
                    ReactiveStatement::Instruction(_) => {}
                }
            }
        }
    }

    #[test]
    fn every_block_is_consumed_exactly_once() {
        // Structure recovery failing to consume a block (or consuming one
        // twice) returns an invariant error; a clean result is the check.
        let function = reactive(
            r#"{
                "params": [{"name": "a"}, {"name": "b"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "c"},
                                       "init": {"type": "LogicalExpression", "operator": "&&",
                                                "left": {"type": "Identifier", "name": "a"},
                                                "right": {"type": "Identifier", "name": "b"}}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "c"}}
                ]}
            }"#,
        );
        assert!(!function.body.is_empty());
        let _ = count_terminals(&function.body);
    }
}
