//! The reactive tree: the structured form the flat CFG is rebuilt into once
//! analysis is done. A function body is an ordered statement sequence; each
//! statement is a plain instruction, a control terminal carrying nested
//! sequences, or a scope block wrapping the statements a reactive scope
//! memoizes. This is the only representation codegen consumes.

use std::fmt::Write as _;

use itertools::Itertools;

use crate::{
    ast::LogicalOperator,
    diagnostics::SourceLocation,
    hir::{BlockId, Instruction, InstructionId, Place, ScopeRef},
    index::Index,
};

pub mod align;
pub mod build;
pub mod deps;
pub mod flatten;
pub mod merge;
pub mod prune;
pub mod rename;
pub mod scopes;

#[derive(Debug)]
pub struct ReactiveFunction {
    pub loc: SourceLocation,
    pub name: Option<String>,
    pub params: Vec<Place>,
    pub body: Vec<ReactiveStatement>,
    pub is_async: bool,
    pub is_generator: bool,
}

#[derive(Debug)]
pub enum ReactiveStatement {
    Instruction(Instruction),
    Terminal(ReactiveTerminalStatement),
    Scope(ReactiveScopeBlock),
}

/// A run of statements owned by one reactive scope. Codegen turns this into
/// a guarded recomputation.
#[derive(Debug)]
pub struct ReactiveScopeBlock {
    pub scope: ScopeRef,
    pub body: Vec<ReactiveStatement>,
}

#[derive(Debug)]
pub struct ReactiveTerminalStatement {
    pub id: InstructionId,
    /// Break target this construct answers to; labeled statements and loops
    /// carry one so labeled breaks can name them. Cleared by the label prune
    /// pass when nothing targets it.
    pub label: Option<BlockId>,
    pub terminal: ReactiveTerminal,
    pub loc: SourceLocation,
}

/// Control constructs in tree form. Loop tests and short-circuit right-hand
/// sides are statement sequences that store into a result temporary; codegen
/// collapses them back into expressions.
#[derive(Debug)]
pub enum ReactiveTerminal {
    Break {
        label: Option<BlockId>,
    },
    Continue {
        label: Option<BlockId>,
    },
    Return {
        value: Option<Place>,
    },
    Throw {
        value: Place,
    },
    If {
        test: Place,
        consequent: Vec<ReactiveStatement>,
        alternate: Option<Vec<ReactiveStatement>>,
    },
    /// `&&` / `||` / `??`: the result temporary already holds the left
    /// value; `rhs` overwrites it when evaluation continues past the
    /// short circuit.
    Logical {
        operator: LogicalOperator,
        test: Place,
        rhs: Vec<ReactiveStatement>,
    },
    Ternary {
        test: Place,
        consequent: Vec<ReactiveStatement>,
        alternate: Vec<ReactiveStatement>,
    },
    While {
        test: Vec<ReactiveStatement>,
        test_value: Place,
        body: Vec<ReactiveStatement>,
    },
    DoWhile {
        body: Vec<ReactiveStatement>,
        test: Vec<ReactiveStatement>,
        test_value: Place,
    },
    For {
        init: Vec<ReactiveStatement>,
        test: Vec<ReactiveStatement>,
        test_value: Place,
        update: Vec<ReactiveStatement>,
        body: Vec<ReactiveStatement>,
    },
    Label {
        body: Vec<ReactiveStatement>,
    },
    Try {
        body: Vec<ReactiveStatement>,
        handler_param: Option<Place>,
        handler: Vec<ReactiveStatement>,
    },
}

impl ReactiveTerminal {
    /// Visits every nested statement sequence, in evaluation order.
    pub fn each_block<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Vec<ReactiveStatement>),
    {
        match self {
            ReactiveTerminal::Break { .. }
            | ReactiveTerminal::Continue { .. }
            | ReactiveTerminal::Return { .. }
            | ReactiveTerminal::Throw { .. } => {}
            ReactiveTerminal::If {
                consequent,
                alternate,
                ..
            } => {
                f(consequent);
                if let Some(alternate) = alternate {
                    f(alternate);
                }
            }
            ReactiveTerminal::Logical { rhs, .. } => f(rhs),
            ReactiveTerminal::Ternary {
                consequent,
                alternate,
                ..
            } => {
                f(consequent);
                f(alternate);
            }
            ReactiveTerminal::While { test, body, .. } => {
                f(test);
                f(body);
            }
            ReactiveTerminal::DoWhile { body, test, .. } => {
                f(body);
                f(test);
            }
            ReactiveTerminal::For {
                init,
                test,
                update,
                body,
                ..
            } => {
                f(init);
                f(test);
                f(update);
                f(body);
            }
            ReactiveTerminal::Label { body } => f(body),
            ReactiveTerminal::Try { body, handler, .. } => {
                f(body);
                f(handler);
            }
        }
    }

    /// Visits the places the terminal itself reads (not those of nested
    /// statements).
    pub fn each_operand<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Place),
    {
        match self {
            ReactiveTerminal::Return { value: Some(value) } => f(value),
            ReactiveTerminal::Throw { value } => f(value),
            ReactiveTerminal::If { test, .. }
            | ReactiveTerminal::Logical { test, .. }
            | ReactiveTerminal::Ternary { test, .. } => f(test),
            ReactiveTerminal::While { test_value, .. }
            | ReactiveTerminal::DoWhile { test_value, .. }
            | ReactiveTerminal::For { test_value, .. } => f(test_value),
            ReactiveTerminal::Break { .. }
            | ReactiveTerminal::Continue { .. }
            | ReactiveTerminal::Return { value: None }
            | ReactiveTerminal::Label { .. }
            | ReactiveTerminal::Try { .. } => {}
        }
    }
}

/// The instruction-id interval a statement subtree covers, used to line
/// scope ranges up against statement boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub lo: InstructionId,
    pub hi: InstructionId,
}

impl Span {
    fn point(id: InstructionId) -> Self {
        Self { lo: id, hi: id }
    }

    fn union(self, other: Self) -> Self {
        Self {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }

    pub fn contains_range(&self, range: &crate::hir::MutableRange) -> bool {
        range.start >= self.lo && range.end <= self.hi.plus(1)
    }

    pub fn intersects_range(&self, range: &crate::hir::MutableRange) -> bool {
        range.start <= self.hi && range.end > self.lo
    }
}

pub fn statement_span(statement: &mut ReactiveStatement) -> Span {
    match statement {
        ReactiveStatement::Instruction(instruction) => Span::point(instruction.id),
        ReactiveStatement::Terminal(terminal) => {
            let mut span = Span::point(terminal.id);
            terminal.terminal.each_block(|block| {
                if let Some(inner) = block_span(block) {
                    span = span.union(inner);
                }
            });
            span
        }
        ReactiveStatement::Scope(scope_block) => {
            let range = scope_block.scope.borrow().range;
            let range_span = Span {
                lo: range.start,
                hi: InstructionId::new(range.end.index().saturating_sub(1)),
            };
            match block_span(&mut scope_block.body) {
                Some(inner) => inner.union(range_span),
                None => range_span,
            }
        }
    }
}

pub fn block_span(block: &mut [ReactiveStatement]) -> Option<Span> {
    block
        .iter_mut()
        .map(statement_span)
        .reduce(|a, b| a.union(b))
}

/// Visits every place in a statement subtree: instruction destinations,
/// operands, stored-to bindings, and terminal operands.
pub fn each_place<F>(block: &mut Vec<ReactiveStatement>, f: &mut F)
where
    F: FnMut(&mut Place),
{
    for statement in block {
        match statement {
            ReactiveStatement::Instruction(instruction) => each_instruction_place(instruction, f),
            ReactiveStatement::Terminal(terminal) => {
                terminal.terminal.each_operand(&mut *f);
                terminal.terminal.each_block(|nested| each_place(nested, f));
            }
            ReactiveStatement::Scope(scope_block) => each_place(&mut scope_block.body, f),
        }
    }
}

pub fn each_instruction_place<F>(instruction: &mut Instruction, f: &mut F)
where
    F: FnMut(&mut Place),
{
    f(&mut instruction.lvalue);
    instruction.each_operand(&mut *f);
    instruction.each_store(|lvalue| f(&mut lvalue.place));
}

/* Printing, for snapshots and the CLI. */

pub fn print_reactive_function(function: &ReactiveFunction) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "function {}({})",
        function.name.as_deref().unwrap_or("<anonymous>"),
        function.params.iter().map(|p| p.to_string()).join(", ")
    );
    print_block(&mut out, &function.body, 0);
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("    ");
    }
}

fn print_block(out: &mut String, block: &[ReactiveStatement], depth: usize) {
    for statement in block {
        print_statement(out, statement, depth);
    }
}

fn print_statement(out: &mut String, statement: &ReactiveStatement, depth: usize) {
    match statement {
        ReactiveStatement::Instruction(instruction) => {
            indent(out, depth);
            let _ = writeln!(out, "[{}] {instruction}", instruction.id);
        }
        ReactiveStatement::Scope(scope_block) => {
            let scope = scope_block.scope.borrow();
            indent(out, depth);
            let _ = writeln!(
                out,
                "scope @{} [{}:{}] deps=[{}] decls=[{}] {{",
                scope.id,
                scope.range.start,
                scope.range.end,
                scope
                    .dependencies
                    .iter()
                    .map(|d| {
                        let mut s = d.identifier.to_string();
                        for segment in &d.path {
                            s.push('.');
                            s.push_str(segment);
                        }
                        s
                    })
                    .join(", "),
                scope.declarations.values().map(|d| d.to_string()).join(", ")
            );
            print_block(out, &scope_block.body, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        ReactiveStatement::Terminal(terminal) => print_terminal(out, terminal, depth),
    }
}

fn print_terminal(out: &mut String, statement: &ReactiveTerminalStatement, depth: usize) {
    indent(out, depth);
    if let Some(label) = statement.label {
        let _ = write!(out, "bb{label}: ");
    }
    match &statement.terminal {
        ReactiveTerminal::Break { label } => {
            let _ = match label {
                Some(label) => writeln!(out, "break bb{label}"),
                None => writeln!(out, "break"),
            };
        }
        ReactiveTerminal::Continue { label } => {
            let _ = match label {
                Some(label) => writeln!(out, "continue bb{label}"),
                None => writeln!(out, "continue"),
            };
        }
        ReactiveTerminal::Return { value } => {
            let _ = match value {
                Some(value) => writeln!(out, "return {value}"),
                None => writeln!(out, "return"),
            };
        }
        ReactiveTerminal::Throw { value } => {
            let _ = writeln!(out, "throw {value}");
        }
        ReactiveTerminal::If {
            test,
            consequent,
            alternate,
        } => {
            let _ = writeln!(out, "if ({test}) {{");
            print_block(out, consequent, depth + 1);
            if let Some(alternate) = alternate {
                indent(out, depth);
                out.push_str("} else {\n");
                print_block(out, alternate, depth + 1);
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        ReactiveTerminal::Logical { operator, test, rhs } => {
            let _ = writeln!(out, "logical({operator}) {test} {{");
            print_block(out, rhs, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        ReactiveTerminal::Ternary {
            test,
            consequent,
            alternate,
        } => {
            let _ = writeln!(out, "ternary ({test}) {{");
            print_block(out, consequent, depth + 1);
            indent(out, depth);
            out.push_str("} : {\n");
            print_block(out, alternate, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        ReactiveTerminal::While {
            test,
            test_value,
            body,
        } => {
            let _ = writeln!(out, "while (-> {test_value}) {{");
            print_block(out, test, depth + 1);
            indent(out, depth);
            out.push_str("} do {\n");
            print_block(out, body, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        ReactiveTerminal::DoWhile {
            body,
            test,
            test_value,
        } => {
            out.push_str("do {\n");
            print_block(out, body, depth + 1);
            indent(out, depth);
            let _ = writeln!(out, "}} while (-> {test_value}) {{");
            print_block(out, test, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        ReactiveTerminal::For {
            init,
            test,
            test_value,
            update,
            body,
        } => {
            let _ = writeln!(out, "for (-> {test_value}) {{");
            print_block(out, init, depth + 1);
            indent(out, depth);
            out.push_str("} test {\n");
            print_block(out, test, depth + 1);
            if !update.is_empty() {
                indent(out, depth);
                out.push_str("} update {\n");
                print_block(out, update, depth + 1);
            }
            indent(out, depth);
            out.push_str("} do {\n");
            print_block(out, body, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        ReactiveTerminal::Label { body } => {
            out.push_str("label {\n");
            print_block(out, body, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
        ReactiveTerminal::Try {
            body,
            handler_param,
            handler,
        } => {
            out.push_str("try {\n");
            print_block(out, body, depth + 1);
            indent(out, depth);
            match handler_param {
                Some(param) => {
                    let _ = writeln!(out, "}} catch ({param}) {{");
                }
                None => out.push_str("} catch {\n"),
            }
            print_block(out, handler, depth + 1);
            indent(out, depth);
            out.push_str("}\n");
        }
    }
}
