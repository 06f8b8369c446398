//! The HIR: a control-flow graph of basic blocks over flattened, side-effect
//! ordered instructions. Compound expressions from the AST never nest here;
//! every sub-expression is lowered into a prior instruction and referenced
//! through a `Place`. This is the single shared structure every analysis pass
//! mutates in place.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

use crate::{
    ast::{BinaryOperator, LogicalOperator, UnaryOperator},
    diagnostics::SourceLocation,
    index::{simple_index, Index, OrderedMap},
};

pub mod builder;
pub mod lowering;
pub mod print;
pub mod shape;

simple_index! {
    /// Identifies a basic block within one function's CFG
    pub struct BlockId;
}

simple_index! {
    /// Identifies an instruction. Ids are assigned monotonically across the
    /// whole function (not per block), which is what makes a single global
    /// sweep over instruction ids a correct range analysis.
    pub struct InstructionId;
}

simple_index! {
    /// Identifies a variable (or SSA version of one)
    pub struct IdentifierId;
}

simple_index! {
    /// Identifies a reactive scope
    pub struct ScopeId;
}

/// How a reference treats the value it references. The lattice is
/// deliberately conservative: when in doubt a reference is assumed to
/// mutate.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, strum::Display)]
pub enum Effect {
    /// The reference freezes the value; it may never be mutated afterwards.
    #[strum(serialize = "freeze")]
    Freeze,

    /// The reference reads the value.
    #[strum(serialize = "read")]
    Read,

    /// The reference reads and stores the value inside another value.
    #[strum(serialize = "capture")]
    Capture,

    /// The reference *may* mutate the value. Used both when the compiler is
    /// being conservative and when the effect is polymorphic (mutable inputs
    /// may be mutated, immutable inputs are left alone). Not an error for
    /// immutable values.
    #[strum(serialize = "mutate?")]
    ConditionallyMutate,

    /// The reference *does* mutate the value. An immutable value flowing
    /// into such a position is invalid input.
    #[strum(serialize = "mutate")]
    Mutate,

    /// The reference stores into the value (an alias may be created).
    #[strum(serialize = "store")]
    Store,
}

impl Effect {
    pub fn is_mutable(self) -> bool {
        match self {
            Self::Capture | Self::Store | Self::ConditionallyMutate | Self::Mutate => true,
            Self::Read | Self::Freeze => false,
        }
    }
}

/// Inferred value type, used only to steer effect defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Type {
    #[default]
    Unknown,
    Primitive,
    Object,
    Function,
}

/// The instruction-id interval during which a value may still be written.
/// Start is inclusive, end is exclusive; a never-mutated value has a range of
/// length one (frozen immediately after creation).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct MutableRange {
    pub start: InstructionId,
    pub end: InstructionId,
}

impl MutableRange {
    pub fn new() -> Self {
        Self::default()
    }

    /// A range spanning more than the defining instruction, i.e. the value
    /// is observably mutated after creation.
    pub fn is_mutable(&self) -> bool {
        self.end > self.start.plus(1)
    }

    pub fn overlaps(&self, other: &MutableRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug)]
pub struct IdentifierData {
    pub mutable_range: MutableRange,
    pub scope: Option<ScopeRef>,
    pub ty: Type,
}

/// A variable. Every use site is a fresh `Place`, but all of them share one
/// `IdentifierData` cell, so range/scope updates made by inference are
/// observed everywhere at once. Identifiers live for the duration of one
/// function's compilation and are never destroyed.
#[derive(Clone, Debug)]
pub struct Identifier {
    pub id: IdentifierId,
    /// Debug name. `None` for compiler temporaries until `rename_variables`.
    pub name: Option<String>,
    pub data: Rc<RefCell<IdentifierData>>,
}

impl Identifier {
    pub fn new(id: IdentifierId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            data: Rc::new(RefCell::new(IdentifierData {
                mutable_range: MutableRange::new(),
                scope: None,
                ty: Type::Unknown,
            })),
        }
    }

    pub fn mutable_range(&self) -> MutableRange {
        self.data.borrow().mutable_range
    }

    pub fn scope(&self) -> Option<ScopeRef> {
        self.data.borrow().scope.clone()
    }

    /// A named (non-temporary) binding that is promoted to an output of its
    /// scope rather than being internal to it.
    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }
}

/// A reference to a value: an identifier plus the effect this particular use
/// has on it. `effect` is `None` until inference runs and `Some` for every
/// place afterwards.
#[derive(Clone, Debug)]
pub struct Place {
    pub identifier: Identifier,
    pub effect: Option<Effect>,
    pub loc: SourceLocation,
}

impl Place {
    pub fn new(identifier: Identifier, loc: SourceLocation) -> Self {
        Self {
            identifier,
            effect: None,
            loc,
        }
    }
}

/// `const` vs `let` vs reassignment. Lowering only emits `Let`/`Const`
/// conservatively; `leave_ssa` rewrites kinds once reassignment facts are
/// known.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, strum::Display)]
pub enum InstructionKind {
    #[strum(serialize = "const")]
    Const,
    #[strum(serialize = "let")]
    Let,
    #[strum(serialize = "reassign")]
    Reassign,
}

#[derive(Clone, Debug)]
pub struct LValue {
    pub place: Place,
    pub kind: InstructionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue {
    Boolean(bool),
    Number(f64),
    String(String),
    Null,
    Undefined,
}

#[derive(Debug)]
pub struct Instruction {
    pub id: InstructionId,
    /// Destination temporary holding this instruction's result.
    pub lvalue: Place,
    pub value: InstructionValue,
    pub loc: SourceLocation,
}

/// Operand shapes. A closed sum: every consumer matches exhaustively so a new
/// variant fails to compile until each pass handles it.
#[derive(Debug)]
pub enum InstructionValue {
    Primitive {
        value: PrimitiveValue,
    },
    LoadLocal {
        place: Place,
    },
    LoadGlobal {
        name: String,
    },
    /// Read of a closed-over binding inside the declaring function.
    LoadContext {
        place: Place,
    },
    DeclareLocal {
        lvalue: LValue,
    },
    /// Declaration of a binding captured (and possibly reassigned) by a
    /// nested function.
    DeclareContext {
        lvalue: LValue,
    },
    StoreLocal {
        lvalue: LValue,
        value: Place,
    },
    Binary {
        left: Place,
        operator: BinaryOperator,
        right: Place,
    },
    Unary {
        operator: UnaryOperator,
        operand: Place,
    },
    /// `++x` / `--x`: the instruction's result is the updated value. `value`
    /// holds the variable's prior value; `lvalue` receives the new one.
    PrefixUpdate {
        lvalue: LValue,
        operation: BinaryOperator,
        value: Place,
    },
    /// `x++` / `x--`: same shape, but the instruction's result is the value
    /// from before the update, which is what distinguishes it from the
    /// prefix form.
    PostfixUpdate {
        lvalue: LValue,
        operation: BinaryOperator,
        value: Place,
    },
    Call {
        callee: Place,
        arguments: Vec<Place>,
    },
    /// `object.method(...)`, kept distinct from a property load feeding a
    /// call so effect inference can see the receiver and treat the call as
    /// potentially mutating it.
    MethodCall {
        object: Place,
        property: String,
        arguments: Vec<Place>,
    },
    PropertyLoad {
        object: Place,
        property: String,
    },
    PropertyStore {
        object: Place,
        property: String,
        value: Place,
    },
    ComputedLoad {
        object: Place,
        property: Place,
    },
    Object {
        properties: Vec<(String, Place)>,
    },
    Array {
        elements: Vec<Option<Place>>,
    },
    JsxElement {
        tag: String,
        attributes: Vec<(String, Place)>,
        children: Vec<Place>,
    },
    /// A nested function expression, lowered as a distinct inner function
    /// attached here rather than inlined. `dependencies` are the places the
    /// inner function closes over, in the outer function's naming.
    FunctionExpression {
        dependencies: Vec<Place>,
        lowered: Box<HIRFunction>,
        node: crate::ast::Expression,
    },
}

impl Instruction {
    /// Visits every place this instruction reads.
    pub fn each_operand<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Place),
    {
        match &mut self.value {
            InstructionValue::Primitive { .. }
            | InstructionValue::LoadGlobal { .. }
            | InstructionValue::DeclareLocal { .. }
            | InstructionValue::DeclareContext { .. } => {}
            InstructionValue::LoadLocal { place } | InstructionValue::LoadContext { place } => {
                f(place)
            }
            InstructionValue::StoreLocal { value, .. }
            | InstructionValue::PrefixUpdate { value, .. }
            | InstructionValue::PostfixUpdate { value, .. } => f(value),
            InstructionValue::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            InstructionValue::Unary { operand, .. } => f(operand),
            InstructionValue::Call { callee, arguments } => {
                f(callee);
                for argument in arguments {
                    f(argument);
                }
            }
            InstructionValue::MethodCall {
                object, arguments, ..
            } => {
                f(object);
                for argument in arguments {
                    f(argument);
                }
            }
            InstructionValue::PropertyLoad { object, .. } => f(object),
            InstructionValue::PropertyStore { object, value, .. } => {
                f(object);
                f(value);
            }
            InstructionValue::ComputedLoad { object, property } => {
                f(object);
                f(property);
            }
            InstructionValue::Object { properties } => {
                for (_, value) in properties {
                    f(value);
                }
            }
            InstructionValue::Array { elements } => {
                for element in elements.iter_mut().flatten() {
                    f(element);
                }
            }
            InstructionValue::JsxElement {
                attributes,
                children,
                ..
            } => {
                for (_, value) in attributes {
                    f(value);
                }
                for child in children {
                    f(child);
                }
            }
            InstructionValue::FunctionExpression { dependencies, .. } => {
                for dependency in dependencies {
                    f(dependency);
                }
            }
        }
    }

    /// Visits every binding this instruction declares or stores to (not the
    /// destination temporary).
    pub fn each_store<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut LValue),
    {
        match &mut self.value {
            InstructionValue::DeclareLocal { lvalue }
            | InstructionValue::DeclareContext { lvalue }
            | InstructionValue::StoreLocal { lvalue, .. }
            | InstructionValue::PrefixUpdate { lvalue, .. }
            | InstructionValue::PostfixUpdate { lvalue, .. } => f(lvalue),
            _ => {}
        }
    }
}

/// Break vs continue flavor of an unconditional jump, kept so structure
/// recovery can map gotos back to the construct that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum GotoKind {
    #[strum(serialize = "break")]
    Break,
    #[strum(serialize = "continue")]
    Continue,
}

/// Control transfer out of a block. Every terminal carries its own
/// instruction id and source location; `Terminal::new` is the only
/// constructor, which is what enforces that invariant.
#[derive(Debug)]
pub struct Terminal {
    pub id: InstructionId,
    pub value: TerminalValue,
    pub loc: SourceLocation,
}

impl Terminal {
    pub fn new(id: InstructionId, value: TerminalValue, loc: SourceLocation) -> Self {
        Self { id, value, loc }
    }
}

#[derive(Debug)]
pub enum TerminalValue {
    Goto {
        block: BlockId,
        kind: GotoKind,
    },
    If {
        test: Place,
        consequent: BlockId,
        alternate: BlockId,
        /// Merge point the branches rejoin at; `None` when both branches
        /// abruptly terminate.
        fallthrough: Option<BlockId>,
    },
    /// Short-circuit `&&` / `||` / `??`. The test value has already been
    /// stored into the result temporary; `rhs` (a value block) overwrites it
    /// when evaluation continues.
    Logical {
        operator: LogicalOperator,
        test: Place,
        rhs: BlockId,
        fallthrough: BlockId,
    },
    /// `test ? consequent : alternate` over value blocks.
    Ternary {
        test: Place,
        consequent: BlockId,
        alternate: BlockId,
        fallthrough: BlockId,
    },
    While {
        test: BlockId,
        body: BlockId,
        fallthrough: BlockId,
    },
    DoWhile {
        body: BlockId,
        test: BlockId,
        fallthrough: BlockId,
    },
    For {
        init: BlockId,
        test: BlockId,
        update: Option<BlockId>,
        body: BlockId,
        fallthrough: BlockId,
    },
    Label {
        block: BlockId,
        fallthrough: Option<BlockId>,
    },
    Try {
        block: BlockId,
        handler: BlockId,
        handler_param: Option<Place>,
        fallthrough: BlockId,
    },
    Return {
        value: Option<Place>,
    },
    Throw {
        value: Place,
    },
    Unsupported,
}

impl TerminalValue {
    /// The CFG edges leaving this terminal, in evaluation order. Loop
    /// terminals transfer to their first sub-block; the remaining structure
    /// blocks are reached through that block's own terminals.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            TerminalValue::Goto { block, .. } => vec![*block],
            TerminalValue::If {
                consequent,
                alternate,
                ..
            } => vec![*consequent, *alternate],
            TerminalValue::Logical {
                rhs, fallthrough, ..
            } => vec![*rhs, *fallthrough],
            TerminalValue::Ternary {
                consequent,
                alternate,
                ..
            } => vec![*consequent, *alternate],
            TerminalValue::While { test, .. } => vec![*test],
            TerminalValue::DoWhile { body, .. } => vec![*body],
            TerminalValue::For { init, .. } => vec![*init],
            TerminalValue::Label { block, .. } => vec![*block],
            TerminalValue::Try { block, handler, .. } => vec![*block, *handler],
            TerminalValue::Return { .. }
            | TerminalValue::Throw { .. }
            | TerminalValue::Unsupported => vec![],
        }
    }

    /// The block control falls through to after the whole construct, if the
    /// terminal has one.
    pub fn fallthrough(&self) -> Option<BlockId> {
        match self {
            TerminalValue::If { fallthrough, .. } | TerminalValue::Label { fallthrough, .. } => {
                *fallthrough
            }
            TerminalValue::Logical { fallthrough, .. }
            | TerminalValue::Ternary { fallthrough, .. }
            | TerminalValue::While { fallthrough, .. }
            | TerminalValue::DoWhile { fallthrough, .. }
            | TerminalValue::For { fallthrough, .. }
            | TerminalValue::Try { fallthrough, .. } => Some(*fallthrough),
            TerminalValue::Goto { .. }
            | TerminalValue::Return { .. }
            | TerminalValue::Throw { .. }
            | TerminalValue::Unsupported => None,
        }
    }

    /// Visits every place this terminal reads.
    pub fn each_operand<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Place),
    {
        match self {
            TerminalValue::If { test, .. }
            | TerminalValue::Logical { test, .. }
            | TerminalValue::Ternary { test, .. } => f(test),
            TerminalValue::Return { value: Some(value) } => f(value),
            TerminalValue::Throw { value } => f(value),
            TerminalValue::Goto { .. }
            | TerminalValue::While { .. }
            | TerminalValue::DoWhile { .. }
            | TerminalValue::For { .. }
            | TerminalValue::Label { .. }
            | TerminalValue::Try { .. }
            | TerminalValue::Return { value: None }
            | TerminalValue::Unsupported => {}
        }
    }

    /// Rewrites block references through `f`; used when passes merge or
    /// renumber blocks.
    pub fn map_blocks<F>(&mut self, mut f: F)
    where
        F: FnMut(BlockId) -> BlockId,
    {
        match self {
            TerminalValue::Goto { block, .. } => *block = f(*block),
            TerminalValue::If {
                consequent,
                alternate,
                fallthrough,
                ..
            } => {
                *consequent = f(*consequent);
                *alternate = f(*alternate);
                if let Some(fallthrough) = fallthrough {
                    *fallthrough = f(*fallthrough);
                }
            }
            TerminalValue::Logical {
                rhs, fallthrough, ..
            } => {
                *rhs = f(*rhs);
                *fallthrough = f(*fallthrough);
            }
            TerminalValue::Ternary {
                consequent,
                alternate,
                fallthrough,
                ..
            } => {
                *consequent = f(*consequent);
                *alternate = f(*alternate);
                *fallthrough = f(*fallthrough);
            }
            TerminalValue::While {
                test,
                body,
                fallthrough,
            } => {
                *test = f(*test);
                *body = f(*body);
                *fallthrough = f(*fallthrough);
            }
            TerminalValue::DoWhile {
                body,
                test,
                fallthrough,
            } => {
                *body = f(*body);
                *test = f(*test);
                *fallthrough = f(*fallthrough);
            }
            TerminalValue::For {
                init,
                test,
                update,
                body,
                fallthrough,
            } => {
                *init = f(*init);
                *test = f(*test);
                if let Some(update) = update {
                    *update = f(*update);
                }
                *body = f(*body);
                *fallthrough = f(*fallthrough);
            }
            TerminalValue::Label { block, fallthrough } => {
                *block = f(*block);
                if let Some(fallthrough) = fallthrough {
                    *fallthrough = f(*fallthrough);
                }
            }
            TerminalValue::Try {
                block,
                handler,
                fallthrough,
                ..
            } => {
                *block = f(*block);
                *handler = f(*handler);
                *fallthrough = f(*fallthrough);
            }
            TerminalValue::Return { .. }
            | TerminalValue::Throw { .. }
            | TerminalValue::Unsupported => {}
        }
    }
}

/// What role a block plays in the structure the CFG was lowered from. Value
/// blocks hold the sub-expressions of short-circuit operators and loop
/// tests/updates; structure recovery collapses them back into expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BlockKind {
    #[strum(serialize = "block")]
    Block,
    #[strum(serialize = "value")]
    Value,
    #[strum(serialize = "loop")]
    Loop,
    #[strum(serialize = "sequence")]
    Sequence,
    #[strum(serialize = "catch")]
    Catch,
}

/// An SSA merge point: one operand per predecessor block, mapping that
/// predecessor to the identifier version flowing in from it.
#[derive(Debug)]
pub struct Phi {
    pub id: Identifier,
    pub operands: BTreeMap<BlockId, Identifier>,
    pub ty: Type,
}

#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub kind: BlockKind,
    pub instructions: Vec<Instruction>,
    pub terminal: Terminal,
    pub predecessors: BTreeSet<BlockId>,
    pub phis: Vec<Phi>,
}

#[derive(Debug)]
pub struct HIR {
    pub entry: BlockId,
    /// Blocks in reverse postorder after the shape pass: predecessors
    /// precede successors, barring cycles. No pass other than the documented
    /// ones may reorder this map.
    pub blocks: OrderedMap<BlockId, BasicBlock>,
}

/// One function's worth of HIR plus its signature metadata. Mutated in place
/// by every HIR-level pass.
#[derive(Debug)]
pub struct HIRFunction {
    pub loc: SourceLocation,
    pub name: Option<String>,
    pub params: Vec<Place>,
    /// Places closed over from enclosing functions.
    pub context: Vec<Place>,
    pub body: HIR,
    pub is_async: bool,
    pub is_generator: bool,
}

impl HIRFunction {
    /// Visits every instruction in block order.
    pub fn each_instruction<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Instruction),
    {
        for block in self.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                f(instruction);
            }
        }
    }
}

/// A value plus an access path, so scopes can depend on `props.user.name`
/// instead of all of `props`.
#[derive(Debug, Clone)]
pub struct ReactiveScopeDependency {
    pub identifier: Identifier,
    pub path: Vec<String>,
}

impl ReactiveScopeDependency {
    pub fn same_as(&self, other: &ReactiveScopeDependency) -> bool {
        self.identifier.id == other.identifier.id && self.path == other.path
    }
}

/// The minimal unit of recomputation: a set of identifiers whose mutable
/// ranges were grouped together, the dependencies the group must watch, and
/// the declarations it exposes to code after it.
#[derive(Debug)]
pub struct ReactiveScope {
    pub id: ScopeId,
    pub range: MutableRange,
    pub dependencies: Vec<ReactiveScopeDependency>,
    pub declarations: BTreeMap<IdentifierId, Identifier>,
    pub reassignments: Vec<Identifier>,
    /// Scopes folded into this one by the merge pass.
    pub merged: BTreeSet<ScopeId>,
}

impl ReactiveScope {
    pub fn new(id: ScopeId, range: MutableRange) -> Self {
        Self {
            id,
            range,
            dependencies: Vec::new(),
            declarations: BTreeMap::new(),
            reassignments: Vec::new(),
            merged: BTreeSet::new(),
        }
    }

    pub fn add_dependency(&mut self, dependency: ReactiveScopeDependency) {
        if !self.dependencies.iter().any(|d| d.same_as(&dependency)) {
            self.dependencies.push(dependency);
        }
    }
}

/// Scopes are shared between the identifiers that belong to them and the
/// reactive tree; every holder observes range widening and merging.
pub type ScopeRef = Rc<RefCell<ReactiveScope>>;
