//! Loop flattening. Lowering canonicalizes every loop shape through the
//! same block skeleton, which leaves two artifacts in the rebuilt tree: a
//! `for` whose init and update chains came out empty is really a `while`,
//! and a labeled block whose only statement is a loop is really a labeled
//! loop. Both are rewritten here so codegen emits the form the source had.

use crate::{
    hir::BlockId,
    reactive::{ReactiveFunction, ReactiveStatement, ReactiveTerminal, ReactiveTerminalStatement},
};

pub fn flatten_reactive_loops(function: &mut ReactiveFunction) {
    flatten_block(&mut function.body);
}

fn flatten_block(block: &mut Vec<ReactiveStatement>) {
    for statement in block.iter_mut() {
        match statement {
            ReactiveStatement::Terminal(terminal) => {
                flatten_terminal(terminal);
                terminal.terminal.each_block(flatten_block);
            }
            ReactiveStatement::Scope(scope_block) => flatten_block(&mut scope_block.body),
            ReactiveStatement::Instruction(_) => {}
        }
    }
}

fn flatten_terminal(statement: &mut ReactiveTerminalStatement) {
    // for (;;) skeleton with nothing in init or update is a while.
    if let ReactiveTerminal::For {
        init,
        test,
        test_value,
        update,
        body,
    } = &mut statement.terminal
    {
        if init.is_empty() && update.is_empty() {
            statement.terminal = ReactiveTerminal::While {
                test: std::mem::take(test),
                test_value: test_value.clone(),
                body: std::mem::take(body),
            };
        }
    }

    // A labeled block holding a single loop is the loop itself, labeled.
    // Breaks and continues that named the block are retargeted at the loop.
    let ReactiveTerminal::Label { body } = &mut statement.terminal else {
        return;
    };
    if body.len() != 1 {
        return;
    }
    let is_sole_loop = matches!(
        body.first(),
        Some(ReactiveStatement::Terminal(inner)) if matches!(
            inner.terminal,
            ReactiveTerminal::While { .. }
                | ReactiveTerminal::DoWhile { .. }
                | ReactiveTerminal::For { .. }
        )
    );
    if !is_sole_loop {
        return;
    }

    let Some(ReactiveStatement::Terminal(mut inner)) = body.pop() else {
        return;
    };
    if let (Some(outer_label), Some(inner_label)) = (statement.label, inner.label) {
        retarget_label(&mut inner.terminal, outer_label, inner_label);
    } else if inner.label.is_none() {
        inner.label = statement.label;
    }
    *statement = inner;
}

/// Rewrites break/continue targets from `from` to `to` throughout a
/// subtree. Labels are block ids and block ids are globally unique, so no
/// shadowing can occur.
fn retarget_label(terminal: &mut ReactiveTerminal, from: BlockId, to: BlockId) {
    terminal.each_block(|block| retarget_block(block, from, to));
}

fn retarget_block(block: &mut Vec<ReactiveStatement>, from: BlockId, to: BlockId) {
    for statement in block {
        match statement {
            ReactiveStatement::Terminal(inner) => {
                match &mut inner.terminal {
                    ReactiveTerminal::Break { label: Some(label) }
                    | ReactiveTerminal::Continue { label: Some(label) }
                        if *label == from =>
                    {
                        *label = to;
                    }
                    _ => {}
                }
                inner
                    .terminal
                    .each_block(|nested| retarget_block(nested, from, to));
            }
            ReactiveStatement::Scope(scope_block) => {
                retarget_block(&mut scope_block.body, from, to);
            }
            ReactiveStatement::Instruction(_) => {}
        }
    }
}
