//! A serde-backed subset of the ESTree AST shape. Parsing and printing of
//! source text are external collaborator capabilities; the compiler only
//! consumes and produces this JSON-serializable tree. Nodes carry an optional
//! `loc` which feeds diagnostics; nodes the compiler synthesizes leave it
//! `None` (rendered as the generated-location sentinel).

use serde::{Deserialize, Serialize};

use crate::diagnostics::SourceLocation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub body: Vec<Statement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

/// A function in any of its syntactic positions (declaration, expression,
/// arrow). This is the unit the compiler operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Identifier>,
    pub params: Vec<Identifier>,
    pub body: BlockStatement,
    #[serde(default)]
    pub generator: bool,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

impl Function {
    /// True if the first body statement is the `"use memo"` opt-in
    /// directive. Relevant when `enable_only_on_directive` is set.
    pub fn has_opt_in_directive(&self) -> bool {
        matches!(
            self.body.body.first(),
            Some(Statement::ExpressionStatement { expression, .. })
                if matches!(
                    expression,
                    Expression::Literal { value: LiteralValue::String(s), .. } if s == "use memo"
                )
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            loc: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStatement {
    pub body: Vec<Statement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclarationKind {
    #[serde(rename = "var")]
    Var,
    #[serde(rename = "let")]
    Let,
    #[serde(rename = "const")]
    Const,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDeclarator {
    pub id: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Statement {
    ExpressionStatement {
        expression: Expression,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    VariableDeclaration {
        kind: DeclarationKind,
        declarations: Vec<VariableDeclarator>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    FunctionDeclaration {
        #[serde(flatten)]
        function: Function,
    },
    ReturnStatement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        argument: Option<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    IfStatement {
        test: Expression,
        consequent: Box<Statement>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alternate: Option<Box<Statement>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    BlockStatement {
        body: Vec<Statement>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    WhileStatement {
        test: Expression,
        body: Box<Statement>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    DoWhileStatement {
        body: Box<Statement>,
        test: Expression,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    ForStatement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init: Option<Box<ForInit>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        test: Option<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        update: Option<Expression>,
        body: Box<Statement>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    BreakStatement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<Identifier>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    ContinueStatement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<Identifier>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    LabeledStatement {
        label: Identifier,
        body: Box<Statement>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    ThrowStatement {
        argument: Expression,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    TryStatement {
        block: BlockStatement,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handler: Option<CatchClause>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    EmptyStatement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
}

impl Statement {
    pub fn loc(&self) -> Option<&SourceLocation> {
        match self {
            Statement::ExpressionStatement { loc, .. }
            | Statement::VariableDeclaration { loc, .. }
            | Statement::ReturnStatement { loc, .. }
            | Statement::IfStatement { loc, .. }
            | Statement::BlockStatement { loc, .. }
            | Statement::WhileStatement { loc, .. }
            | Statement::DoWhileStatement { loc, .. }
            | Statement::ForStatement { loc, .. }
            | Statement::BreakStatement { loc, .. }
            | Statement::ContinueStatement { loc, .. }
            | Statement::LabeledStatement { loc, .. }
            | Statement::ThrowStatement { loc, .. }
            | Statement::TryStatement { loc, .. }
            | Statement::EmptyStatement { loc, .. } => loc.as_ref(),
            Statement::FunctionDeclaration { function } => function.loc.as_ref(),
        }
    }
}

/// The `init` slot of a `for` statement: either a declaration or a bare
/// expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForInit {
    Declaration(Statement),
    Expression(Expression),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchClause {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<Identifier>,
    pub body: BlockStatement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Boolean(bool),
    Number(f64),
    String(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum BinaryOperator {
    #[serde(rename = "==")]
    #[strum(serialize = "==")]
    LooseEquals,
    #[serde(rename = "!=")]
    #[strum(serialize = "!=")]
    LooseNotEquals,
    #[serde(rename = "===")]
    #[strum(serialize = "===")]
    Equals,
    #[serde(rename = "!==")]
    #[strum(serialize = "!==")]
    NotEquals,
    #[serde(rename = "<")]
    #[strum(serialize = "<")]
    LessThan,
    #[serde(rename = "<=")]
    #[strum(serialize = "<=")]
    LessThanOrEqual,
    #[serde(rename = ">")]
    #[strum(serialize = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    #[strum(serialize = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "+")]
    #[strum(serialize = "+")]
    Add,
    #[serde(rename = "-")]
    #[strum(serialize = "-")]
    Subtract,
    #[serde(rename = "*")]
    #[strum(serialize = "*")]
    Multiply,
    #[serde(rename = "/")]
    #[strum(serialize = "/")]
    Divide,
    #[serde(rename = "%")]
    #[strum(serialize = "%")]
    Modulo,
    #[serde(rename = "**")]
    #[strum(serialize = "**")]
    Exponent,
    #[serde(rename = "&")]
    #[strum(serialize = "&")]
    BitwiseAnd,
    #[serde(rename = "|")]
    #[strum(serialize = "|")]
    BitwiseOr,
    #[serde(rename = "^")]
    #[strum(serialize = "^")]
    BitwiseXor,
    #[serde(rename = "<<")]
    #[strum(serialize = "<<")]
    ShiftLeft,
    #[serde(rename = ">>")]
    #[strum(serialize = ">>")]
    ShiftRight,
    #[serde(rename = ">>>")]
    #[strum(serialize = ">>>")]
    UnsignedShiftRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum LogicalOperator {
    #[serde(rename = "&&")]
    #[strum(serialize = "&&")]
    And,
    #[serde(rename = "||")]
    #[strum(serialize = "||")]
    Or,
    #[serde(rename = "??")]
    #[strum(serialize = "??")]
    NullishCoalescing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum UnaryOperator {
    #[serde(rename = "-")]
    #[strum(serialize = "-")]
    Negate,
    #[serde(rename = "+")]
    #[strum(serialize = "+")]
    Plus,
    #[serde(rename = "!")]
    #[strum(serialize = "!")]
    Not,
    #[serde(rename = "~")]
    #[strum(serialize = "~")]
    BitwiseNot,
    #[serde(rename = "typeof")]
    #[strum(serialize = "typeof")]
    Typeof,
    #[serde(rename = "void")]
    #[strum(serialize = "void")]
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum UpdateOperator {
    #[serde(rename = "++")]
    #[strum(serialize = "++")]
    Increment,
    #[serde(rename = "--")]
    #[strum(serialize = "--")]
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentOperator {
    #[serde(rename = "=")]
    Assign,
    #[serde(rename = "+=")]
    AddAssign,
    #[serde(rename = "-=")]
    SubtractAssign,
    #[serde(rename = "*=")]
    MultiplyAssign,
    #[serde(rename = "/=")]
    DivideAssign,
}

impl AssignmentOperator {
    /// The binary operator an update-assignment desugars to, if any.
    pub fn binary_operator(self) -> Option<BinaryOperator> {
        match self {
            AssignmentOperator::Assign => None,
            AssignmentOperator::AddAssign => Some(BinaryOperator::Add),
            AssignmentOperator::SubtractAssign => Some(BinaryOperator::Subtract),
            AssignmentOperator::MultiplyAssign => Some(BinaryOperator::Multiply),
            AssignmentOperator::DivideAssign => Some(BinaryOperator::Divide),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub key: Identifier,
    pub value: Expression,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsxAttribute {
    pub name: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expression {
    Identifier {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    Literal {
        value: LiteralValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    ArrayExpression {
        elements: Vec<Option<Expression>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    ObjectExpression {
        properties: Vec<Property>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    BinaryExpression {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    LogicalExpression {
        operator: LogicalOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    UnaryExpression {
        operator: UnaryOperator,
        argument: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    UpdateExpression {
        operator: UpdateOperator,
        prefix: bool,
        argument: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    AssignmentExpression {
        operator: AssignmentOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    ConditionalExpression {
        test: Box<Expression>,
        consequent: Box<Expression>,
        alternate: Box<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    CallExpression {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    NewExpression {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    MemberExpression {
        object: Box<Expression>,
        property: Box<Expression>,
        #[serde(default)]
        computed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    SequenceExpression {
        expressions: Vec<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    FunctionExpression {
        #[serde(flatten)]
        function: Function,
    },
    ArrowFunctionExpression {
        params: Vec<Identifier>,
        body: Box<ArrowBody>,
        #[serde(default, rename = "async")]
        is_async: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    JSXElement {
        name: Identifier,
        #[serde(default)]
        attributes: Vec<JsxAttribute>,
        #[serde(default)]
        children: Vec<Expression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
}

impl Expression {
    pub fn loc(&self) -> Option<&SourceLocation> {
        match self {
            Expression::Identifier { loc, .. }
            | Expression::Literal { loc, .. }
            | Expression::ArrayExpression { loc, .. }
            | Expression::ObjectExpression { loc, .. }
            | Expression::BinaryExpression { loc, .. }
            | Expression::LogicalExpression { loc, .. }
            | Expression::UnaryExpression { loc, .. }
            | Expression::UpdateExpression { loc, .. }
            | Expression::AssignmentExpression { loc, .. }
            | Expression::ConditionalExpression { loc, .. }
            | Expression::CallExpression { loc, .. }
            | Expression::NewExpression { loc, .. }
            | Expression::MemberExpression { loc, .. }
            | Expression::SequenceExpression { loc, .. }
            | Expression::ArrowFunctionExpression { loc, .. }
            | Expression::JSXElement { loc, .. } => loc.as_ref(),
            Expression::FunctionExpression { function } => function.loc.as_ref(),
        }
    }

    /// Shorthand constructor for a reference to a named binding.
    pub fn ident(name: impl Into<String>) -> Self {
        Expression::Identifier {
            name: name.into(),
            loc: None,
        }
    }

    pub fn number(value: f64) -> Self {
        Expression::Literal {
            value: LiteralValue::Number(value),
            loc: None,
        }
    }
}

/// An arrow function body: a block or a bare expression (which behaves as an
/// implicit return).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArrowBody {
    Block(BlockStatement),
    Expression(Expression),
}
