//! AST to HIR lowering. The defining transformation of this pass is
//! flattening: compound expressions lower their operands into temporaries
//! first (preserving left-to-right evaluation order exactly), then emit one
//! instruction that references only already-lowered places. Short-circuiting
//! operators get explicit branch terminals instead of being flattened into
//! plain instructions. Unsupported constructs are accumulated so a single run
//! can report every problem in a function; the function fails once lowering
//! completes with any recorded.

use hashbrown::{HashMap, HashSet};

use crate::{
    ast,
    diagnostics::{CompilerError, ErrorCategory, SourceLocation},
    environment::Environment,
    hir::{
        builder::Builder, BlockKind, GotoKind, HIRFunction, Identifier, Instruction,
        InstructionKind, InstructionValue, LValue, Place, PrimitiveValue, TerminalValue,
    },
};

/// Lowers one function AST into HIR, allocating all of its identifiers and
/// places and registering closed-over variables as context places.
pub fn lower(env: &Environment, function: &ast::Function) -> Result<HIRFunction, CompilerError> {
    lower_impl(env, FunctionSource::from_function(function), HashMap::new())
}

/// The pieces of a function common to declarations, expressions, and arrows.
struct FunctionSource<'a> {
    name: Option<&'a str>,
    params: &'a [ast::Identifier],
    body: BodySource<'a>,
    is_async: bool,
    is_generator: bool,
    loc: Option<&'a SourceLocation>,
}

enum BodySource<'a> {
    Block(&'a ast::BlockStatement),
    Expression(&'a ast::Expression),
}

impl<'a> FunctionSource<'a> {
    fn from_function(function: &'a ast::Function) -> Self {
        Self {
            name: function.id.as_ref().map(|id| id.name.as_str()),
            params: &function.params,
            body: BodySource::Block(&function.body),
            is_async: function.is_async,
            is_generator: function.generator,
            loc: function.loc.as_ref(),
        }
    }
}

fn lower_impl(
    env: &Environment,
    source: FunctionSource<'_>,
    outer_bindings: HashMap<String, Identifier>,
) -> Result<HIRFunction, CompilerError> {
    let loc = source
        .loc
        .cloned()
        .unwrap_or(SourceLocation::Generated);

    let mut cx = LoweringContext {
        builder: Builder::new(env),
        scopes: vec![HashMap::new()],
        outer_bindings,
        context: Vec::new(),
        context_reassigned: HashSet::new(),
        errors: CompilerError::new(ErrorCategory::UnsupportedSyntax),
        pending_label: None,
    };

    let mut params = Vec::new();
    for param in source.params {
        let identifier = cx.declare(&param.name);
        params.push(Place::new(
            identifier,
            param.loc.clone().unwrap_or(SourceLocation::Generated),
        ));
    }

    match source.body {
        BodySource::Block(block) => {
            cx.scan_context_reassignments(&block.body);
            for statement in &block.body {
                cx.lower_statement(statement)?;
            }
        }
        BodySource::Expression(expression) => {
            // Expression-bodied arrow: the expression is an implicit return.
            let value = cx.lower_expression(expression)?;
            let loc = expression
                .loc()
                .cloned()
                .unwrap_or(SourceLocation::Generated);
            cx.builder.terminate_with_fresh(
                TerminalValue::Return { value: Some(value) },
                loc,
                BlockKind::Block,
            );
        }
    }

    let body = cx
        .builder
        .finish(TerminalValue::Return { value: None }, loc.clone());

    if !cx.errors.is_empty() {
        return Err(cx.errors);
    }

    Ok(HIRFunction {
        loc,
        name: source.name.map(str::to_owned),
        params,
        context: cx.context,
        body,
        is_async: source.is_async,
        is_generator: source.is_generator,
    })
}

enum CallTarget {
    Function(Place),
    Method { object: Place, property: String },
}

struct LoweringContext<'env> {
    builder: Builder<'env>,
    /// Lexical binding scopes, innermost last.
    scopes: Vec<HashMap<String, Identifier>>,
    /// Flattened bindings of all enclosing functions; names resolved here
    /// become context places.
    outer_bindings: HashMap<String, Identifier>,
    /// Closed-over places registered for this function, deduplicated.
    context: Vec<Place>,
    /// Names reassigned inside nested functions; their declarations lower to
    /// `DeclareContext` so later passes know an alias outlives this frame.
    context_reassigned: HashSet<String>,
    errors: CompilerError,
    /// Label waiting to be claimed by the next loop statement.
    pending_label: Option<String>,
}

impl<'env> LoweringContext<'env> {
    fn declare(&mut self, name: &str) -> Identifier {
        let identifier = Identifier::new(
            self.builder.environment().next_identifier_id(),
            Some(name.to_owned()),
        );
        self.scopes
            .last_mut()
            .expect("at least one binding scope is always open")
            .insert(name.to_owned(), identifier.clone());
        identifier
    }

    fn resolve_local(&self, name: &str) -> Option<Identifier> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    fn push_value(&mut self, value: InstructionValue, loc: SourceLocation) -> Place {
        let lvalue = self.builder.make_temporary(loc.clone());
        let id = self.builder.next_instruction_id();
        self.builder.push_instruction(Instruction {
            id,
            lvalue: lvalue.clone(),
            value,
            loc,
        });
        lvalue
    }

    /// Records an unsupported construct and continues with an `undefined`
    /// placeholder so the rest of the function can still be scanned.
    fn unsupported(&mut self, reason: impl Into<String>, loc: Option<&SourceLocation>) -> Place {
        self.errors.push_detail(reason, loc.cloned());
        self.push_value(
            InstructionValue::Primitive {
                value: PrimitiveValue::Undefined,
            },
            loc.cloned().unwrap_or(SourceLocation::Generated),
        )
    }

    /* Statements */

    fn lower_statement(&mut self, statement: &ast::Statement) -> Result<(), CompilerError> {
        let loc = statement
            .loc()
            .cloned()
            .unwrap_or(SourceLocation::Generated);
        match statement {
            ast::Statement::ExpressionStatement { expression, .. } => {
                self.lower_expression(expression)?;
            }
            ast::Statement::VariableDeclaration {
                kind, declarations, ..
            } => {
                for declarator in declarations {
                    self.lower_declarator(*kind, declarator)?;
                }
            }
            ast::Statement::FunctionDeclaration { function } => {
                // A function declaration is a const binding to a function
                // expression in the enclosing scope.
                let Some(id) = &function.id else {
                    self.unsupported("function declaration without a name", Some(&loc));
                    return Ok(());
                };
                let node = ast::Expression::FunctionExpression {
                    function: function.clone(),
                };
                let value = self.lower_function_expression(
                    FunctionSource::from_function(function),
                    node,
                    &loc,
                )?;
                let identifier = self.declare(&id.name);
                self.push_value(
                    InstructionValue::StoreLocal {
                        lvalue: LValue {
                            place: Place::new(identifier, loc.clone()),
                            kind: InstructionKind::Const,
                        },
                        value,
                    },
                    loc,
                );
            }
            ast::Statement::ReturnStatement { argument, .. } => {
                let value = match argument {
                    Some(argument) => Some(self.lower_expression(argument)?),
                    None => None,
                };
                self.builder.terminate_with_fresh(
                    TerminalValue::Return { value },
                    loc,
                    BlockKind::Block,
                );
            }
            ast::Statement::IfStatement {
                test,
                consequent,
                alternate,
                ..
            } => {
                let test = self.lower_expression(test)?;
                let consequent_id = self.builder.reserve();
                let fallthrough = self.builder.reserve();
                let alternate_id = match alternate {
                    Some(_) => self.builder.reserve(),
                    None => fallthrough,
                };
                self.builder.terminate(
                    TerminalValue::If {
                        test,
                        consequent: consequent_id,
                        alternate: alternate_id,
                        fallthrough: Some(fallthrough),
                    },
                    loc.clone(),
                    consequent_id,
                    BlockKind::Block,
                );
                self.lower_in_scope(|cx| cx.lower_statement(consequent))?;
                let next = match alternate {
                    Some(_) => alternate_id,
                    None => fallthrough,
                };
                self.builder.terminate(
                    TerminalValue::Goto {
                        block: fallthrough,
                        kind: GotoKind::Break,
                    },
                    loc.clone(),
                    next,
                    BlockKind::Block,
                );
                if let Some(alternate) = alternate {
                    self.lower_in_scope(|cx| cx.lower_statement(alternate))?;
                    self.builder.terminate(
                        TerminalValue::Goto {
                            block: fallthrough,
                            kind: GotoKind::Break,
                        },
                        loc,
                        fallthrough,
                        BlockKind::Block,
                    );
                }
            }
            ast::Statement::BlockStatement { body, .. } => {
                self.lower_in_scope(|cx| {
                    for statement in body {
                        cx.lower_statement(statement)?;
                    }
                    Ok(())
                })?;
            }
            ast::Statement::WhileStatement { test, body, .. } => {
                let label = self.pending_label.take();
                let test_id = self.builder.reserve();
                let body_id = self.builder.reserve();
                let fallthrough = self.builder.reserve();
                self.builder.terminate(
                    TerminalValue::While {
                        test: test_id,
                        body: body_id,
                        fallthrough,
                    },
                    loc.clone(),
                    test_id,
                    BlockKind::Loop,
                );
                let test = self.lower_expression(test)?;
                self.builder.terminate(
                    TerminalValue::If {
                        test,
                        consequent: body_id,
                        alternate: fallthrough,
                        fallthrough: None,
                    },
                    loc.clone(),
                    body_id,
                    BlockKind::Block,
                );
                self.builder
                    .enter_control_scope(label, fallthrough, Some(test_id));
                let lowered = self.lower_in_scope(|cx| cx.lower_statement(body));
                self.builder.exit_control_scope();
                lowered?;
                self.builder.terminate(
                    TerminalValue::Goto {
                        block: test_id,
                        kind: GotoKind::Continue,
                    },
                    loc,
                    fallthrough,
                    BlockKind::Block,
                );
            }
            ast::Statement::DoWhileStatement { body, test, .. } => {
                let label = self.pending_label.take();
                let body_id = self.builder.reserve();
                let test_id = self.builder.reserve();
                let fallthrough = self.builder.reserve();
                self.builder.terminate(
                    TerminalValue::DoWhile {
                        body: body_id,
                        test: test_id,
                        fallthrough,
                    },
                    loc.clone(),
                    body_id,
                    BlockKind::Block,
                );
                self.builder
                    .enter_control_scope(label, fallthrough, Some(test_id));
                let lowered = self.lower_in_scope(|cx| cx.lower_statement(body));
                self.builder.exit_control_scope();
                lowered?;
                self.builder.terminate(
                    TerminalValue::Goto {
                        block: test_id,
                        kind: GotoKind::Continue,
                    },
                    loc.clone(),
                    test_id,
                    BlockKind::Loop,
                );
                let test = self.lower_expression(test)?;
                self.builder.terminate(
                    TerminalValue::If {
                        test,
                        consequent: body_id,
                        alternate: fallthrough,
                        fallthrough: None,
                    },
                    loc,
                    fallthrough,
                    BlockKind::Block,
                );
            }
            ast::Statement::ForStatement {
                init,
                test,
                update,
                body,
                ..
            } => {
                self.lower_for_statement(
                    init.as_deref(),
                    test.as_ref(),
                    update.as_ref(),
                    body,
                    loc,
                )?;
            }
            ast::Statement::BreakStatement { label, .. } => {
                let target = self
                    .builder
                    .resolve_break(label.as_ref().map(|l| l.name.as_str()))?;
                self.builder.terminate_with_fresh(
                    TerminalValue::Goto {
                        block: target,
                        kind: GotoKind::Break,
                    },
                    loc,
                    BlockKind::Block,
                );
            }
            ast::Statement::ContinueStatement { label, .. } => {
                let target = self
                    .builder
                    .resolve_continue(label.as_ref().map(|l| l.name.as_str()))?;
                self.builder.terminate_with_fresh(
                    TerminalValue::Goto {
                        block: target,
                        kind: GotoKind::Continue,
                    },
                    loc,
                    BlockKind::Block,
                );
            }
            ast::Statement::LabeledStatement { label, body, .. } => {
                if matches!(
                    body.as_ref(),
                    ast::Statement::WhileStatement { .. }
                        | ast::Statement::DoWhileStatement { .. }
                        | ast::Statement::ForStatement { .. }
                ) {
                    // The loop claims the label so continue resolves to its
                    // own continue target.
                    self.pending_label = Some(label.name.clone());
                    self.lower_statement(body)?;
                } else {
                    let block_id = self.builder.reserve();
                    let fallthrough = self.builder.reserve();
                    self.builder.terminate(
                        TerminalValue::Label {
                            block: block_id,
                            fallthrough: Some(fallthrough),
                        },
                        loc.clone(),
                        block_id,
                        BlockKind::Block,
                    );
                    self.builder
                        .enter_control_scope(Some(label.name.clone()), fallthrough, None);
                    let lowered = self.lower_statement(body);
                    self.builder.exit_control_scope();
                    lowered?;
                    self.builder.terminate(
                        TerminalValue::Goto {
                            block: fallthrough,
                            kind: GotoKind::Break,
                        },
                        loc,
                        fallthrough,
                        BlockKind::Block,
                    );
                }
            }
            ast::Statement::ThrowStatement { argument, .. } => {
                let value = self.lower_expression(argument)?;
                self.builder.terminate_with_fresh(
                    TerminalValue::Throw { value },
                    loc,
                    BlockKind::Block,
                );
            }
            ast::Statement::TryStatement { block, handler, .. } => {
                let Some(handler_clause) = handler else {
                    self.unsupported("try without a catch handler", Some(&loc));
                    return Ok(());
                };
                let block_id = self.builder.reserve();
                let handler_id = self.builder.reserve();
                let fallthrough = self.builder.reserve();

                // The handler parameter is bound in the catch scope; it has
                // no defining instruction, like function parameters.
                let handler_param = handler_clause.param.as_ref().map(|param| {
                    Place::new(
                        Identifier::new(
                            self.builder.environment().next_identifier_id(),
                            Some(param.name.clone()),
                        ),
                        param.loc.clone().unwrap_or(SourceLocation::Generated),
                    )
                });

                self.builder.terminate(
                    TerminalValue::Try {
                        block: block_id,
                        handler: handler_id,
                        handler_param: handler_param.clone(),
                        fallthrough,
                    },
                    loc.clone(),
                    block_id,
                    BlockKind::Block,
                );
                self.lower_in_scope(|cx| {
                    for statement in &block.body {
                        cx.lower_statement(statement)?;
                    }
                    Ok(())
                })?;
                self.builder.terminate(
                    TerminalValue::Goto {
                        block: fallthrough,
                        kind: GotoKind::Break,
                    },
                    loc.clone(),
                    handler_id,
                    BlockKind::Catch,
                );
                self.scopes.push(HashMap::new());
                if let (Some(place), Some(param)) = (&handler_param, &handler_clause.param) {
                    self.scopes
                        .last_mut()
                        .unwrap()
                        .insert(param.name.clone(), place.identifier.clone());
                }
                for statement in &handler_clause.body.body {
                    self.lower_statement(statement)?;
                }
                self.scopes.pop();
                self.builder.terminate(
                    TerminalValue::Goto {
                        block: fallthrough,
                        kind: GotoKind::Break,
                    },
                    loc,
                    fallthrough,
                    BlockKind::Block,
                );
            }
            ast::Statement::EmptyStatement { .. } => {}
        }
        Ok(())
    }

    fn lower_for_statement(
        &mut self,
        init: Option<&ast::ForInit>,
        test: Option<&ast::Expression>,
        update: Option<&ast::Expression>,
        body: &ast::Statement,
        loc: SourceLocation,
    ) -> Result<(), CompilerError> {
        let label = self.pending_label.take();
        let init_id = self.builder.reserve();
        let test_id = self.builder.reserve();
        let update_id = update.map(|_| self.builder.reserve());
        let body_id = self.builder.reserve();
        let fallthrough = self.builder.reserve();

        self.builder.terminate(
            TerminalValue::For {
                init: init_id,
                test: test_id,
                update: update_id,
                body: body_id,
                fallthrough,
            },
            loc.clone(),
            init_id,
            BlockKind::Loop,
        );

        // Loop-scoped bindings introduced by the init are visible in the
        // test, update, and body.
        self.scopes.push(HashMap::new());

        match init {
            Some(ast::ForInit::Declaration(declaration)) => {
                self.lower_statement(declaration)?;
            }
            Some(ast::ForInit::Expression(expression)) => {
                self.lower_expression(expression)?;
            }
            None => {}
        }
        self.builder.terminate(
            TerminalValue::Goto {
                block: test_id,
                kind: GotoKind::Break,
            },
            loc.clone(),
            test_id,
            BlockKind::Loop,
        );

        let test_place = match test {
            Some(test) => self.lower_expression(test)?,
            // A missing test behaves as `true`.
            None => self.push_value(
                InstructionValue::Primitive {
                    value: PrimitiveValue::Boolean(true),
                },
                loc.clone(),
            ),
        };
        self.builder.terminate(
            TerminalValue::If {
                test: test_place,
                consequent: body_id,
                alternate: fallthrough,
                fallthrough: None,
            },
            loc.clone(),
            body_id,
            BlockKind::Block,
        );

        let continue_target = update_id.unwrap_or(test_id);
        self.builder
            .enter_control_scope(label, fallthrough, Some(continue_target));
        let lowered = self.lower_in_scope(|cx| cx.lower_statement(body));
        self.builder.exit_control_scope();
        lowered?;
        self.builder.terminate(
            TerminalValue::Goto {
                block: continue_target,
                kind: GotoKind::Continue,
            },
            loc.clone(),
            update_id.unwrap_or(fallthrough),
            if update_id.is_some() {
                BlockKind::Loop
            } else {
                BlockKind::Block
            },
        );

        if let (Some(update), Some(_)) = (update, update_id) {
            self.lower_expression(update)?;
            self.builder.terminate(
                TerminalValue::Goto {
                    block: test_id,
                    kind: GotoKind::Continue,
                },
                loc,
                fallthrough,
                BlockKind::Block,
            );
        }

        self.scopes.pop();
        Ok(())
    }

    fn lower_declarator(
        &mut self,
        kind: ast::DeclarationKind,
        declarator: &ast::VariableDeclarator,
    ) -> Result<(), CompilerError> {
        let loc = declarator
            .loc
            .clone()
            .or_else(|| declarator.id.loc.clone())
            .unwrap_or(SourceLocation::Generated);
        let instruction_kind = match kind {
            ast::DeclarationKind::Const => InstructionKind::Const,
            // `var` hoisting is not modeled; treat as `let`.
            ast::DeclarationKind::Let | ast::DeclarationKind::Var => InstructionKind::Let,
        };
        let init = match &declarator.init {
            Some(init) => Some(self.lower_expression(init)?),
            None => None,
        };
        let captured = self.context_reassigned.contains(&declarator.id.name);
        let identifier = self.declare(&declarator.id.name);
        let lvalue = LValue {
            place: Place::new(identifier, loc.clone()),
            kind: instruction_kind,
        };
        if captured {
            self.push_value(
                InstructionValue::DeclareContext {
                    lvalue: LValue {
                        kind: InstructionKind::Let,
                        ..lvalue.clone()
                    },
                },
                loc.clone(),
            );
            if let Some(value) = init {
                self.push_value(
                    InstructionValue::StoreLocal {
                        lvalue: LValue {
                            kind: InstructionKind::Reassign,
                            ..lvalue
                        },
                        value,
                    },
                    loc,
                );
            }
        } else {
            match init {
                Some(value) => {
                    self.push_value(InstructionValue::StoreLocal { lvalue, value }, loc);
                }
                None => {
                    self.push_value(InstructionValue::DeclareLocal { lvalue }, loc);
                }
            }
        }
        Ok(())
    }

    fn lower_in_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, CompilerError>,
    ) -> Result<T, CompilerError> {
        self.scopes.push(HashMap::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    /* Expressions */

    fn lower_expression(
        &mut self,
        expression: &ast::Expression,
    ) -> Result<Place, CompilerError> {
        let loc = expression
            .loc()
            .cloned()
            .unwrap_or(SourceLocation::Generated);
        let place = match expression {
            ast::Expression::Identifier { name, .. } => self.lower_identifier_read(name, loc),
            ast::Expression::Literal { value, .. } => {
                let value = match value {
                    ast::LiteralValue::Boolean(b) => PrimitiveValue::Boolean(*b),
                    ast::LiteralValue::Number(n) => PrimitiveValue::Number(*n),
                    ast::LiteralValue::String(s) => PrimitiveValue::String(s.clone()),
                    ast::LiteralValue::Null => PrimitiveValue::Null,
                };
                self.push_value(InstructionValue::Primitive { value }, loc)
            }
            ast::Expression::ArrayExpression { elements, .. } => {
                let mut lowered = Vec::with_capacity(elements.len());
                for element in elements {
                    lowered.push(match element {
                        Some(element) => Some(self.lower_expression(element)?),
                        None => None,
                    });
                }
                self.push_value(InstructionValue::Array { elements: lowered }, loc)
            }
            ast::Expression::ObjectExpression { properties, .. } => {
                let mut lowered = Vec::with_capacity(properties.len());
                for property in properties {
                    let value = self.lower_expression(&property.value)?;
                    lowered.push((property.key.name.clone(), value));
                }
                self.push_value(InstructionValue::Object { properties: lowered }, loc)
            }
            ast::Expression::BinaryExpression {
                operator,
                left,
                right,
                ..
            } => {
                let left = self.lower_expression(left)?;
                let right = self.lower_expression(right)?;
                self.push_value(
                    InstructionValue::Binary {
                        left,
                        operator: *operator,
                        right,
                    },
                    loc,
                )
            }
            ast::Expression::LogicalExpression {
                operator,
                left,
                right,
                ..
            } => self.lower_logical(*operator, left, right, loc)?,
            ast::Expression::UnaryExpression {
                operator, argument, ..
            } => {
                let operand = self.lower_expression(argument)?;
                self.push_value(
                    InstructionValue::Unary {
                        operator: *operator,
                        operand,
                    },
                    loc,
                )
            }
            ast::Expression::UpdateExpression {
                operator,
                prefix,
                argument,
                ..
            } => {
                // The prior value is loaded first; prefix and postfix forms
                // then differ only in which value the expression produces.
                let ast::Expression::Identifier { name, .. } = argument.as_ref() else {
                    return Ok(self.unsupported(
                        "update expressions are only supported on variables",
                        Some(&loc),
                    ));
                };
                let Some(identifier) = self.resolve_local(name) else {
                    return Ok(self.unsupported(
                        format!("update of unbound or captured variable `{name}`"),
                        Some(&loc),
                    ));
                };
                let old = self.push_value(
                    InstructionValue::LoadLocal {
                        place: Place::new(identifier.clone(), loc.clone()),
                    },
                    loc.clone(),
                );
                let operation = match operator {
                    ast::UpdateOperator::Increment => ast::BinaryOperator::Add,
                    ast::UpdateOperator::Decrement => ast::BinaryOperator::Subtract,
                };
                let lvalue = LValue {
                    place: Place::new(identifier, loc.clone()),
                    kind: InstructionKind::Reassign,
                };
                let value = if *prefix {
                    InstructionValue::PrefixUpdate {
                        lvalue,
                        operation,
                        value: old,
                    }
                } else {
                    InstructionValue::PostfixUpdate {
                        lvalue,
                        operation,
                        value: old,
                    }
                };
                self.push_value(value, loc)
            }
            ast::Expression::AssignmentExpression {
                operator,
                left,
                right,
                ..
            } => self.lower_assignment(*operator, left, right, loc)?,
            ast::Expression::ConditionalExpression {
                test,
                consequent,
                alternate,
                ..
            } => self.lower_ternary(test, consequent, alternate, loc)?,
            ast::Expression::CallExpression {
                callee, arguments, ..
            } => {
                // Method calls keep their receiver; everything else lowers
                // the callee like any other operand.
                let target = self.lower_call_target(callee)?;
                let mut lowered = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    lowered.push(self.lower_expression(argument)?);
                }
                match target {
                    CallTarget::Function(callee) => self.push_value(
                        InstructionValue::Call {
                            callee,
                            arguments: lowered,
                        },
                        loc,
                    ),
                    CallTarget::Method { object, property } => self.push_value(
                        InstructionValue::MethodCall {
                            object,
                            property,
                            arguments: lowered,
                        },
                        loc,
                    ),
                }
            }
            ast::Expression::NewExpression { .. } => {
                self.unsupported("constructor calls are not supported", Some(&loc))
            }
            ast::Expression::MemberExpression {
                object,
                property,
                computed,
                ..
            } => {
                let object = self.lower_expression(object)?;
                if *computed {
                    let property = self.lower_expression(property)?;
                    self.push_value(InstructionValue::ComputedLoad { object, property }, loc)
                } else {
                    let ast::Expression::Identifier { name, .. } = property.as_ref() else {
                        return Ok(self.unsupported(
                            "non-identifier property in member expression",
                            Some(&loc),
                        ));
                    };
                    self.push_value(
                        InstructionValue::PropertyLoad {
                            object,
                            property: name.clone(),
                        },
                        loc,
                    )
                }
            }
            ast::Expression::SequenceExpression { expressions, .. } => {
                let mut last = None;
                for expression in expressions {
                    last = Some(self.lower_expression(expression)?);
                }
                match last {
                    Some(place) => place,
                    None => self.unsupported("empty sequence expression", Some(&loc)),
                }
            }
            ast::Expression::FunctionExpression { function } => self.lower_function_expression(
                FunctionSource::from_function(function),
                expression.clone(),
                &loc,
            )?,
            ast::Expression::ArrowFunctionExpression {
                params,
                body,
                is_async,
                ..
            } => {
                let source = FunctionSource {
                    name: None,
                    params,
                    body: match body.as_ref() {
                        ast::ArrowBody::Block(block) => BodySource::Block(block),
                        ast::ArrowBody::Expression(expression) => {
                            BodySource::Expression(expression)
                        }
                    },
                    is_async: *is_async,
                    is_generator: false,
                    loc: Some(&loc),
                };
                self.lower_function_expression(source, expression.clone(), &loc)?
            }
            ast::Expression::JSXElement {
                name,
                attributes,
                children,
                ..
            } => {
                let mut lowered_attributes = Vec::with_capacity(attributes.len());
                for attribute in attributes {
                    let value = match &attribute.value {
                        Some(value) => self.lower_expression(value)?,
                        // Bare attribute shorthand for `={true}`.
                        None => self.push_value(
                            InstructionValue::Primitive {
                                value: PrimitiveValue::Boolean(true),
                            },
                            loc.clone(),
                        ),
                    };
                    lowered_attributes.push((attribute.name.name.clone(), value));
                }
                let mut lowered_children = Vec::with_capacity(children.len());
                for child in children {
                    lowered_children.push(self.lower_expression(child)?);
                }
                self.push_value(
                    InstructionValue::JsxElement {
                        tag: name.name.clone(),
                        attributes: lowered_attributes,
                        children: lowered_children,
                    },
                    loc,
                )
            }
        };
        Ok(place)
    }

    fn lower_identifier_read(&mut self, name: &str, loc: SourceLocation) -> Place {
        if let Some(identifier) = self.resolve_local(name) {
            return self.push_value(
                InstructionValue::LoadLocal {
                    place: Place::new(identifier, loc.clone()),
                },
                loc,
            );
        }
        if let Some(identifier) = self.outer_bindings.get(name).cloned() {
            self.register_context(&identifier, &loc);
            return self.push_value(
                InstructionValue::LoadContext {
                    place: Place::new(identifier, loc.clone()),
                },
                loc,
            );
        }
        if name == "undefined" {
            return self.push_value(
                InstructionValue::Primitive {
                    value: PrimitiveValue::Undefined,
                },
                loc,
            );
        }
        self.push_value(
            InstructionValue::LoadGlobal {
                name: name.to_owned(),
            },
            loc,
        )
    }

    fn register_context(&mut self, identifier: &Identifier, loc: &SourceLocation) {
        if !self
            .context
            .iter()
            .any(|place| place.identifier.id == identifier.id)
        {
            self.context.push(Place::new(identifier.clone(), loc.clone()));
        }
    }

    fn lower_call_target(
        &mut self,
        callee: &ast::Expression,
    ) -> Result<CallTarget, CompilerError> {
        if let ast::Expression::MemberExpression {
            object,
            property,
            computed: false,
            ..
        } = callee
        {
            if let ast::Expression::Identifier { name, .. } = property.as_ref() {
                let object = self.lower_expression(object)?;
                return Ok(CallTarget::Method {
                    object,
                    property: name.clone(),
                });
            }
        }
        Ok(CallTarget::Function(self.lower_expression(callee)?))
    }

    fn lower_assignment(
        &mut self,
        operator: ast::AssignmentOperator,
        left: &ast::Expression,
        right: &ast::Expression,
        loc: SourceLocation,
    ) -> Result<Place, CompilerError> {
        match left {
            ast::Expression::Identifier { name, .. } => {
                let identifier = match self.resolve_local(name) {
                    Some(identifier) => identifier,
                    None => match self.outer_bindings.get(name).cloned() {
                        Some(identifier) => {
                            self.register_context(&identifier, &loc);
                            identifier
                        }
                        None => {
                            return Ok(self.unsupported(
                                format!("assignment to unbound variable `{name}`"),
                                Some(&loc),
                            ))
                        }
                    },
                };
                let value = match operator.binary_operator() {
                    None => self.lower_expression(right)?,
                    Some(binary) => {
                        // `x += e` reads x before evaluating e.
                        let current = self.push_value(
                            InstructionValue::LoadLocal {
                                place: Place::new(identifier.clone(), loc.clone()),
                            },
                            loc.clone(),
                        );
                        let rhs = self.lower_expression(right)?;
                        self.push_value(
                            InstructionValue::Binary {
                                left: current,
                                operator: binary,
                                right: rhs,
                            },
                            loc.clone(),
                        )
                    }
                };
                self.push_value(
                    InstructionValue::StoreLocal {
                        lvalue: LValue {
                            place: Place::new(identifier, loc.clone()),
                            kind: InstructionKind::Reassign,
                        },
                        value: value.clone(),
                    },
                    loc,
                );
                Ok(value)
            }
            ast::Expression::MemberExpression {
                object,
                property,
                computed: false,
                ..
            } => {
                let ast::Expression::Identifier { name, .. } = property.as_ref() else {
                    return Ok(self.unsupported(
                        "non-identifier property in assignment target",
                        Some(&loc),
                    ));
                };
                if operator != ast::AssignmentOperator::Assign {
                    return Ok(self.unsupported(
                        "compound assignment to a property is not supported",
                        Some(&loc),
                    ));
                }
                let object = self.lower_expression(object)?;
                let value = self.lower_expression(right)?;
                self.push_value(
                    InstructionValue::PropertyStore {
                        object,
                        property: name.clone(),
                        value: value.clone(),
                    },
                    loc,
                );
                Ok(value)
            }
            _ => Ok(self.unsupported("unsupported assignment target", Some(&loc))),
        }
    }

    /// Short-circuit lowering: the left value is stored into a result
    /// temporary, then a logical terminal decides whether the right-hand
    /// value block overwrites it.
    fn lower_logical(
        &mut self,
        operator: ast::LogicalOperator,
        left: &ast::Expression,
        right: &ast::Expression,
        loc: SourceLocation,
    ) -> Result<Place, CompilerError> {
        let result = Identifier::new(self.builder.environment().next_identifier_id(), None);
        self.push_value(
            InstructionValue::DeclareLocal {
                lvalue: LValue {
                    place: Place::new(result.clone(), loc.clone()),
                    kind: InstructionKind::Let,
                },
            },
            loc.clone(),
        );

        let left = self.lower_expression(left)?;
        self.push_value(
            InstructionValue::StoreLocal {
                lvalue: LValue {
                    place: Place::new(result.clone(), loc.clone()),
                    kind: InstructionKind::Reassign,
                },
                value: left.clone(),
            },
            loc.clone(),
        );

        let rhs = self.builder.reserve();
        let fallthrough = self.builder.reserve();
        self.builder.terminate(
            TerminalValue::Logical {
                operator,
                test: left,
                rhs,
                fallthrough,
            },
            loc.clone(),
            rhs,
            BlockKind::Value,
        );

        let right = self.lower_expression(right)?;
        self.push_value(
            InstructionValue::StoreLocal {
                lvalue: LValue {
                    place: Place::new(result.clone(), loc.clone()),
                    kind: InstructionKind::Reassign,
                },
                value: right,
            },
            loc.clone(),
        );
        self.builder.terminate(
            TerminalValue::Goto {
                block: fallthrough,
                kind: GotoKind::Break,
            },
            loc.clone(),
            fallthrough,
            BlockKind::Block,
        );

        Ok(self.push_value(
            InstructionValue::LoadLocal {
                place: Place::new(result, loc.clone()),
            },
            loc,
        ))
    }

    fn lower_ternary(
        &mut self,
        test: &ast::Expression,
        consequent: &ast::Expression,
        alternate: &ast::Expression,
        loc: SourceLocation,
    ) -> Result<Place, CompilerError> {
        let result = Identifier::new(self.builder.environment().next_identifier_id(), None);
        self.push_value(
            InstructionValue::DeclareLocal {
                lvalue: LValue {
                    place: Place::new(result.clone(), loc.clone()),
                    kind: InstructionKind::Let,
                },
            },
            loc.clone(),
        );

        let test = self.lower_expression(test)?;
        let consequent_id = self.builder.reserve();
        let alternate_id = self.builder.reserve();
        let fallthrough = self.builder.reserve();
        self.builder.terminate(
            TerminalValue::Ternary {
                test,
                consequent: consequent_id,
                alternate: alternate_id,
                fallthrough,
            },
            loc.clone(),
            consequent_id,
            BlockKind::Value,
        );

        for (branch, next, next_kind) in [
            (consequent, alternate_id, BlockKind::Value),
            (alternate, fallthrough, BlockKind::Block),
        ] {
            let value = self.lower_expression(branch)?;
            self.push_value(
                InstructionValue::StoreLocal {
                    lvalue: LValue {
                        place: Place::new(result.clone(), loc.clone()),
                        kind: InstructionKind::Reassign,
                    },
                    value,
                },
                loc.clone(),
            );
            self.builder.terminate(
                TerminalValue::Goto {
                    block: fallthrough,
                    kind: GotoKind::Break,
                },
                loc.clone(),
                next,
                next_kind,
            );
        }

        Ok(self.push_value(
            InstructionValue::LoadLocal {
                place: Place::new(result, loc.clone()),
            },
            loc,
        ))
    }

    fn lower_function_expression(
        &mut self,
        source: FunctionSource<'_>,
        node: ast::Expression,
        loc: &SourceLocation,
    ) -> Result<Place, CompilerError> {
        // The inner function sees every binding visible here.
        let mut outer = self.outer_bindings.clone();
        for scope in &self.scopes {
            for (name, identifier) in scope {
                outer.insert(name.clone(), identifier.clone());
            }
        }

        let lowered = match lower_impl(self.builder.environment(), source, outer) {
            Ok(lowered) => lowered,
            Err(errors) => {
                // Surface the inner function's problems as our own and keep
                // scanning.
                self.errors.merge(errors);
                return Ok(self.push_value(
                    InstructionValue::Primitive {
                        value: PrimitiveValue::Undefined,
                    },
                    loc.clone(),
                ));
            }
        };

        // Captured places that belong to *this* function's enclosing scopes
        // must propagate outward as our own context.
        let mut dependencies = Vec::with_capacity(lowered.context.len());
        for place in &lowered.context {
            let in_local_scopes = self.scopes.iter().any(|scope| {
                scope
                    .values()
                    .any(|identifier| identifier.id == place.identifier.id)
            });
            if !in_local_scopes {
                self.register_context(&place.identifier, &place.loc);
            }
            dependencies.push(place.clone());
        }

        Ok(self.push_value(
            InstructionValue::FunctionExpression {
                dependencies,
                lowered: Box::new(lowered),
                node,
            },
            loc.clone(),
        ))
    }

    /* Pre-scan */

    /// Over-approximates the set of names reassigned inside nested
    /// functions. Declarations of these lower to `DeclareContext`.
    fn scan_context_reassignments(&mut self, body: &[ast::Statement]) {
        let mut names = HashSet::new();
        for statement in body {
            scan_statement(statement, 0, &mut names);
        }
        self.context_reassigned = names;
    }
}

fn scan_statement(statement: &ast::Statement, depth: usize, names: &mut HashSet<String>) {
    match statement {
        ast::Statement::ExpressionStatement { expression, .. } => {
            scan_expression(expression, depth, names)
        }
        ast::Statement::VariableDeclaration { declarations, .. } => {
            for declarator in declarations {
                if let Some(init) = &declarator.init {
                    scan_expression(init, depth, names);
                }
            }
        }
        ast::Statement::FunctionDeclaration { function } => {
            for statement in &function.body.body {
                scan_statement(statement, depth + 1, names);
            }
        }
        ast::Statement::ReturnStatement { argument, .. } => {
            if let Some(argument) = argument {
                scan_expression(argument, depth, names);
            }
        }
        ast::Statement::IfStatement {
            test,
            consequent,
            alternate,
            ..
        } => {
            scan_expression(test, depth, names);
            scan_statement(consequent, depth, names);
            if let Some(alternate) = alternate {
                scan_statement(alternate, depth, names);
            }
        }
        ast::Statement::BlockStatement { body, .. } => {
            for statement in body {
                scan_statement(statement, depth, names);
            }
        }
        ast::Statement::WhileStatement { test, body, .. } => {
            scan_expression(test, depth, names);
            scan_statement(body, depth, names);
        }
        ast::Statement::DoWhileStatement { body, test, .. } => {
            scan_statement(body, depth, names);
            scan_expression(test, depth, names);
        }
        ast::Statement::ForStatement {
            init,
            test,
            update,
            body,
            ..
        } => {
            match init.as_deref() {
                Some(ast::ForInit::Declaration(declaration)) => {
                    scan_statement(declaration, depth, names)
                }
                Some(ast::ForInit::Expression(expression)) => {
                    scan_expression(expression, depth, names)
                }
                None => {}
            }
            if let Some(test) = test {
                scan_expression(test, depth, names);
            }
            if let Some(update) = update {
                scan_expression(update, depth, names);
            }
            scan_statement(body, depth, names);
        }
        ast::Statement::LabeledStatement { body, .. } => scan_statement(body, depth, names),
        ast::Statement::ThrowStatement { argument, .. } => {
            scan_expression(argument, depth, names)
        }
        ast::Statement::TryStatement { block, handler, .. } => {
            for statement in &block.body {
                scan_statement(statement, depth, names);
            }
            if let Some(handler) = handler {
                for statement in &handler.body.body {
                    scan_statement(statement, depth, names);
                }
            }
        }
        ast::Statement::BreakStatement { .. }
        | ast::Statement::ContinueStatement { .. }
        | ast::Statement::EmptyStatement { .. } => {}
    }
}

fn scan_expression(expression: &ast::Expression, depth: usize, names: &mut HashSet<String>) {
    match expression {
        ast::Expression::AssignmentExpression { left, right, .. } => {
            if depth > 0 {
                if let ast::Expression::Identifier { name, .. } = left.as_ref() {
                    names.insert(name.clone());
                }
            }
            scan_expression(left, depth, names);
            scan_expression(right, depth, names);
        }
        ast::Expression::UpdateExpression { argument, .. } => {
            if depth > 0 {
                if let ast::Expression::Identifier { name, .. } = argument.as_ref() {
                    names.insert(name.clone());
                }
            }
        }
        ast::Expression::ArrayExpression { elements, .. } => {
            for element in elements.iter().flatten() {
                scan_expression(element, depth, names);
            }
        }
        ast::Expression::ObjectExpression { properties, .. } => {
            for property in properties {
                scan_expression(&property.value, depth, names);
            }
        }
        ast::Expression::BinaryExpression { left, right, .. }
        | ast::Expression::LogicalExpression { left, right, .. } => {
            scan_expression(left, depth, names);
            scan_expression(right, depth, names);
        }
        ast::Expression::UnaryExpression { argument, .. } => {
            scan_expression(argument, depth, names)
        }
        ast::Expression::ConditionalExpression {
            test,
            consequent,
            alternate,
            ..
        } => {
            scan_expression(test, depth, names);
            scan_expression(consequent, depth, names);
            scan_expression(alternate, depth, names);
        }
        ast::Expression::CallExpression {
            callee, arguments, ..
        }
        | ast::Expression::NewExpression {
            callee, arguments, ..
        } => {
            scan_expression(callee, depth, names);
            for argument in arguments {
                scan_expression(argument, depth, names);
            }
        }
        ast::Expression::MemberExpression {
            object, property, ..
        } => {
            scan_expression(object, depth, names);
            scan_expression(property, depth, names);
        }
        ast::Expression::SequenceExpression { expressions, .. } => {
            for expression in expressions {
                scan_expression(expression, depth, names);
            }
        }
        ast::Expression::FunctionExpression { function } => {
            for statement in &function.body.body {
                scan_statement(statement, depth + 1, names);
            }
        }
        ast::Expression::ArrowFunctionExpression { body, .. } => match body.as_ref() {
            ast::ArrowBody::Block(block) => {
                for statement in &block.body {
                    scan_statement(statement, depth + 1, names);
                }
            }
            ast::ArrowBody::Expression(expression) => {
                scan_expression(expression, depth + 1, names)
            }
        },
        ast::Expression::JSXElement {
            attributes,
            children,
            ..
        } => {
            for attribute in attributes {
                if let Some(value) = &attribute.value {
                    scan_expression(value, depth, names);
                }
            }
            for child in children {
                scan_expression(child, depth, names);
            }
        }
        ast::Expression::Identifier { .. } | ast::Expression::Literal { .. } => {}
    }
}
