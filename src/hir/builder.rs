//! Incremental CFG construction. Lowering drives this builder: it keeps one
//! work-in-progress block open, finishes it by attaching a terminal, and
//! tracks the enclosing loop/label structure so `break` and `continue`
//! resolve to the right jump targets.

use std::collections::BTreeSet;

use crate::{
    diagnostics::{CompilerError, SourceLocation},
    environment::Environment,
    hir::{
        BasicBlock, BlockId, BlockKind, Identifier, InstructionId, Place, Terminal, TerminalValue,
        HIR,
    },
    index::{Index, OrderedMap},
};

struct WipBlock {
    id: BlockId,
    kind: BlockKind,
    instructions: Vec<super::Instruction>,
}

/// Break/continue targets contributed by an enclosing loop or labeled
/// statement.
struct ControlScope {
    label: Option<String>,
    break_target: BlockId,
    /// `None` for labeled non-loop statements, which support break only.
    continue_target: Option<BlockId>,
}

pub struct Builder<'env> {
    env: &'env Environment,
    completed: OrderedMap<BlockId, BasicBlock>,
    wip: WipBlock,
    entry: BlockId,
    control: Vec<ControlScope>,
    next_instruction: usize,
}

impl<'env> Builder<'env> {
    pub fn new(env: &'env Environment) -> Self {
        let entry = env.next_block_id();
        Self {
            env,
            completed: OrderedMap::new(),
            wip: WipBlock {
                id: entry,
                kind: BlockKind::Block,
                instructions: Vec::new(),
            },
            entry,
            control: Vec::new(),
            next_instruction: 0,
        }
    }

    pub fn environment(&self) -> &'env Environment {
        self.env
    }

    /// Provisional instruction id; the shape pass renumbers in reverse
    /// postorder once the CFG is complete.
    pub fn next_instruction_id(&mut self) -> InstructionId {
        let id = InstructionId::new(self.next_instruction);
        self.next_instruction += 1;
        id
    }

    /// A fresh unnamed identifier wrapped in a place, for holding one
    /// instruction's result.
    pub fn make_temporary(&mut self, loc: SourceLocation) -> Place {
        let identifier = Identifier::new(self.env.next_identifier_id(), None);
        Place::new(identifier, loc)
    }

    pub fn push_instruction(&mut self, instruction: super::Instruction) {
        self.wip.instructions.push(instruction);
    }

    /// Allocates a block id without opening it, so terminals can reference
    /// blocks that will be filled in later (loop bodies, fallthroughs).
    pub fn reserve(&mut self) -> BlockId {
        self.env.next_block_id()
    }

    pub fn current_block_id(&self) -> BlockId {
        self.wip.id
    }

    /// Closes the current block with `terminal` and opens `next` as the new
    /// work-in-progress block.
    pub fn terminate(
        &mut self,
        value: TerminalValue,
        loc: SourceLocation,
        next: BlockId,
        next_kind: BlockKind,
    ) {
        let id = self.next_instruction_id();
        let finished = std::mem::replace(
            &mut self.wip,
            WipBlock {
                id: next,
                kind: next_kind,
                instructions: Vec::new(),
            },
        );
        self.completed.insert(
            finished.id,
            BasicBlock {
                id: finished.id,
                kind: finished.kind,
                instructions: finished.instructions,
                terminal: Terminal::new(id, value, loc),
                predecessors: BTreeSet::new(),
                phis: Vec::new(),
            },
        );
    }

    /// Closes the current block and opens a fresh one, returning the new id.
    pub fn terminate_with_fresh(
        &mut self,
        value: TerminalValue,
        loc: SourceLocation,
        next_kind: BlockKind,
    ) -> BlockId {
        let next = self.reserve();
        self.terminate(value, loc, next, next_kind);
        next
    }

    /// Opens a control scope for the span of a loop or labeled statement.
    /// Callers pair this with `exit_control_scope` around the body.
    pub fn enter_control_scope(
        &mut self,
        label: Option<String>,
        break_target: BlockId,
        continue_target: Option<BlockId>,
    ) {
        self.control.push(ControlScope {
            label,
            break_target,
            continue_target,
        });
    }

    pub fn exit_control_scope(&mut self) {
        self.control.pop();
    }

    pub fn resolve_break(&self, label: Option<&str>) -> Result<BlockId, CompilerError> {
        for scope in self.control.iter().rev() {
            match label {
                None => return Ok(scope.break_target),
                Some(label) if scope.label.as_deref() == Some(label) => {
                    return Ok(scope.break_target)
                }
                Some(_) => {}
            }
        }
        Err(CompilerError::invariant(
            match label {
                Some(label) => format!("no target for break to label `{label}`"),
                None => "break outside of a loop or labeled statement".to_owned(),
            },
            None,
        ))
    }

    pub fn resolve_continue(&self, label: Option<&str>) -> Result<BlockId, CompilerError> {
        for scope in self.control.iter().rev() {
            let matches = match label {
                None => true,
                Some(label) => scope.label.as_deref() == Some(label),
            };
            if matches {
                if let Some(target) = scope.continue_target {
                    return Ok(target);
                }
                if label.is_some() {
                    return Err(CompilerError::invariant(
                        "continue target is not a loop",
                        None,
                    ));
                }
            }
        }
        Err(CompilerError::invariant(
            "continue outside of a loop".to_owned(),
            None,
        ))
    }

    /// Finishes construction. The current block must already have been
    /// terminated by the caller (lowering always ends with a return).
    pub fn finish(mut self, final_terminal: TerminalValue, loc: SourceLocation) -> HIR {
        let id = self.next_instruction_id();
        let finished = WipBlock {
            id: self.wip.id,
            kind: self.wip.kind,
            instructions: std::mem::take(&mut self.wip.instructions),
        };
        self.completed.insert(
            finished.id,
            BasicBlock {
                id: finished.id,
                kind: finished.kind,
                instructions: finished.instructions,
                terminal: Terminal::new(id, final_terminal, loc),
                predecessors: BTreeSet::new(),
                phis: Vec::new(),
            },
        );
        HIR {
            entry: self.entry,
            blocks: self.completed,
        }
    }
}
