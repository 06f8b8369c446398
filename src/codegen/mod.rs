//! Final emission: ReactiveFunction back to an ESTree-shaped AST. Plain
//! statements print back as declarations and expressions; single-use
//! unnamed temporaries are inlined into their consumer so the output reads
//! like source, not like a register dump. Each scope block becomes a cache
//! guard over a slot array obtained from one `useMemoCache(n)` call at
//! function entry: recompute when a dependency moved (strict inequality),
//! otherwise restore the outputs from their slots.

use hashbrown::{HashMap, HashSet};

use crate::{
    ast::{
        self, AssignmentOperator, BinaryOperator, DeclarationKind, Expression, ForInit,
        LiteralValue, LogicalOperator, Statement, UpdateOperator,
    },
    diagnostics::{CompilerError, SourceLocation},
    environment::{Environment, GatingConfig},
    hir::{
        BlockId, Identifier, IdentifierId, Instruction, InstructionKind, InstructionValue, Place,
        PrimitiveValue, ReactiveScopeDependency,
    },
    reactive::{
        ReactiveFunction, ReactiveScopeBlock, ReactiveStatement, ReactiveTerminal,
        ReactiveTerminalStatement,
    },
};

/// The local binding the slot array lives in. A `$` never survives
/// renaming, so it cannot collide with function-local names.
const CACHE_VAR: &str = "$";
const CACHE_SENTINEL: &str = "memo.sentinel";

pub fn codegen(env: &Environment, mut function: ReactiveFunction) -> Result<ast::Function, CompilerError> {
    let mut cx = Codegen {
        temporaries: HashMap::new(),
        reads: HashMap::new(),
        hoisted: HashSet::new(),
        next_slot: 0,
        next_label: 0,
    };
    count_reads(&mut function.body, &mut cx.reads);

    let mut body = Vec::new();
    cx.lower_block(&function.body, &mut body)?;

    if cx.next_slot > 0 {
        body.insert(
            0,
            Statement::VariableDeclaration {
                kind: DeclarationKind::Const,
                declarations: vec![ast::VariableDeclarator {
                    id: ast::Identifier::new(CACHE_VAR),
                    init: Some(Expression::CallExpression {
                        callee: Box::new(Expression::ident(env.config.memo_cache_import.as_str())),
                        arguments: vec![Expression::number(cx.next_slot as f64)],
                        loc: None,
                    }),
                    loc: None,
                }],
                loc: None,
            },
        );
    }

    let params = function
        .params
        .iter()
        .map(|place| match &place.identifier.name {
            Some(name) => Ok(ast::Identifier::new(name.as_str())),
            None => Err(CompilerError::invariant(
                "parameter lost its name",
                Some(place.loc.clone()),
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ast::Function {
        id: function.name.as_deref().map(ast::Identifier::new),
        params,
        body: ast::BlockStatement { body, loc: None },
        generator: function.is_generator,
        is_async: function.is_async,
        loc: loc_option(&function.loc),
    })
}

/// Wraps a compiled function in the runtime feature gate:
/// `const f = isEnabled() ? <compiled> : <original>;`. The original function
/// is carried verbatim in the false branch.
pub fn gated_declaration(
    gating: &GatingConfig,
    name: &str,
    compiled: ast::Function,
    original: ast::Function,
) -> Statement {
    Statement::VariableDeclaration {
        kind: DeclarationKind::Const,
        declarations: vec![ast::VariableDeclarator {
            id: ast::Identifier::new(name),
            init: Some(Expression::ConditionalExpression {
                test: Box::new(Expression::CallExpression {
                    callee: Box::new(Expression::ident(gating.import_specifier_name.as_str())),
                    arguments: vec![],
                    loc: None,
                }),
                consequent: Box::new(Expression::FunctionExpression { function: compiled }),
                alternate: Box::new(Expression::FunctionExpression { function: original }),
                loc: None,
            }),
            loc: None,
        }],
        loc: None,
    }
}

fn loc_option(loc: &SourceLocation) -> Option<SourceLocation> {
    match loc {
        SourceLocation::Generated => None,
        known => Some(known.clone()),
    }
}

struct Codegen {
    /// Pending expressions for unnamed single-use temporaries, keyed by the
    /// temporary's id; consumed (moved out) at the use site.
    temporaries: HashMap<IdentifierId, Expression>,
    reads: HashMap<IdentifierId, usize>,
    /// Scope outputs declared with a bare `let` ahead of their guard; later
    /// definitions of these become assignments.
    hoisted: HashSet<IdentifierId>,
    next_slot: usize,
    /// Counter for labels minted around loop bodies whose tail statements a
    /// `continue` must not skip.
    next_label: usize,
}

fn count_reads(block: &mut Vec<ReactiveStatement>, reads: &mut HashMap<IdentifierId, usize>) {
    for statement in block {
        match statement {
            ReactiveStatement::Instruction(instruction) => {
                instruction.each_operand(|place| {
                    *reads.entry(place.identifier.id).or_default() += 1;
                });
            }
            ReactiveStatement::Terminal(terminal) => {
                terminal.terminal.each_operand(|place| {
                    *reads.entry(place.identifier.id).or_default() += 1;
                });
                terminal
                    .terminal
                    .each_block(|nested| count_reads(nested, reads));
            }
            ReactiveStatement::Scope(scope_block) => count_reads(&mut scope_block.body, reads),
        }
    }
}

impl Codegen {
    fn lower_block(
        &mut self,
        block: &[ReactiveStatement],
        out: &mut Vec<Statement>,
    ) -> Result<(), CompilerError> {
        for statement in block {
            match statement {
                ReactiveStatement::Instruction(instruction) => {
                    self.lower_instruction(instruction, out)?;
                }
                ReactiveStatement::Terminal(terminal) => self.lower_terminal(terminal, out)?,
                ReactiveStatement::Scope(scope_block) => self.lower_scope(scope_block, out)?,
            }
        }
        Ok(())
    }

    fn block_statement(&mut self, block: &[ReactiveStatement]) -> Result<Statement, CompilerError> {
        let mut body = Vec::new();
        self.lower_block(block, &mut body)?;
        Ok(Statement::BlockStatement { body, loc: None })
    }

    fn place(&mut self, place: &Place) -> Result<Expression, CompilerError> {
        if let Some(expression) = self.temporaries.remove(&place.identifier.id) {
            return Ok(expression);
        }
        match &place.identifier.name {
            Some(name) => Ok(Expression::ident(name)),
            None => Err(CompilerError::invariant(
                format!(
                    "unnamed temporary {} read with no pending value",
                    place.identifier.id
                ),
                Some(place.loc.clone()),
            )),
        }
    }

    fn binding_name(identifier: &Identifier, loc: &SourceLocation) -> Result<String, CompilerError> {
        identifier.name.clone().ok_or_else(|| {
            CompilerError::invariant(
                format!("binding {} lost its name", identifier.id),
                Some(loc.clone()),
            )
        })
    }

    fn lower_instruction(
        &mut self,
        instruction: &Instruction,
        out: &mut Vec<Statement>,
    ) -> Result<(), CompilerError> {
        match &instruction.value {
            InstructionValue::DeclareLocal { lvalue }
            | InstructionValue::DeclareContext { lvalue } => {
                if self.hoisted.contains(&lvalue.place.identifier.id) {
                    return Ok(());
                }
                let name = Self::binding_name(&lvalue.place.identifier, &instruction.loc)?;
                out.push(Statement::VariableDeclaration {
                    kind: DeclarationKind::Let,
                    declarations: vec![ast::VariableDeclarator {
                        id: ast::Identifier::new(name),
                        init: None,
                        loc: None,
                    }],
                    loc: loc_option(&instruction.loc),
                });
                Ok(())
            }
            InstructionValue::StoreLocal { lvalue, value } => {
                let value = self.place(value)?;
                let name = Self::binding_name(&lvalue.place.identifier, &instruction.loc)?;
                let reassign = lvalue.kind == InstructionKind::Reassign
                    || self.hoisted.contains(&lvalue.place.identifier.id);
                if reassign {
                    out.push(Statement::ExpressionStatement {
                        expression: Expression::AssignmentExpression {
                            operator: AssignmentOperator::Assign,
                            left: Box::new(Expression::ident(name)),
                            right: Box::new(value),
                            loc: None,
                        },
                        loc: loc_option(&instruction.loc),
                    });
                } else {
                    let kind = match lvalue.kind {
                        InstructionKind::Const => DeclarationKind::Const,
                        _ => DeclarationKind::Let,
                    };
                    out.push(Statement::VariableDeclaration {
                        kind,
                        declarations: vec![ast::VariableDeclarator {
                            id: ast::Identifier::new(name),
                            init: Some(value),
                            loc: None,
                        }],
                        loc: loc_option(&instruction.loc),
                    });
                }
                Ok(())
            }
            value => {
                let expression = self.expression(value, &instruction.loc)?;
                let destination = &instruction.lvalue.identifier;
                match &destination.name {
                    Some(name) => out.push(Statement::VariableDeclaration {
                        kind: DeclarationKind::Const,
                        declarations: vec![ast::VariableDeclarator {
                            id: ast::Identifier::new(name),
                            init: Some(expression),
                            loc: None,
                        }],
                        loc: loc_option(&instruction.loc),
                    }),
                    None if self.reads.get(&destination.id).copied().unwrap_or(0) == 0 => {
                        // Result unused but the value may have effects.
                        out.push(Statement::ExpressionStatement {
                            expression,
                            loc: loc_option(&instruction.loc),
                        });
                    }
                    None => {
                        self.temporaries.insert(destination.id, expression);
                    }
                }
                Ok(())
            }
        }
    }

    fn expression(
        &mut self,
        value: &InstructionValue,
        loc: &SourceLocation,
    ) -> Result<Expression, CompilerError> {
        Ok(match value {
            InstructionValue::Primitive { value } => match value {
                PrimitiveValue::Boolean(b) => Expression::Literal {
                    value: LiteralValue::Boolean(*b),
                    loc: None,
                },
                PrimitiveValue::Number(n) => Expression::number(*n),
                PrimitiveValue::String(s) => Expression::Literal {
                    value: LiteralValue::String(s.clone()),
                    loc: None,
                },
                PrimitiveValue::Null => Expression::Literal {
                    value: LiteralValue::Null,
                    loc: None,
                },
                PrimitiveValue::Undefined => Expression::ident("undefined"),
            },
            InstructionValue::LoadLocal { place } | InstructionValue::LoadContext { place } => {
                self.place(place)?
            }
            InstructionValue::LoadGlobal { name } => Expression::ident(name),
            InstructionValue::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.place(left)?;
                let right = self.place(right)?;
                Expression::BinaryExpression {
                    operator: *operator,
                    left: Box::new(left),
                    right: Box::new(right),
                    loc: None,
                }
            }
            InstructionValue::Unary { operator, operand } => Expression::UnaryExpression {
                operator: *operator,
                argument: Box::new(self.place(operand)?),
                loc: None,
            },
            InstructionValue::PrefixUpdate {
                lvalue, operation, ..
            } => Expression::UpdateExpression {
                operator: Self::update_operator(*operation, loc)?,
                prefix: true,
                argument: Box::new(Expression::ident(Self::binding_name(
                    &lvalue.place.identifier,
                    loc,
                )?)),
                loc: None,
            },
            InstructionValue::PostfixUpdate {
                lvalue, operation, ..
            } => Expression::UpdateExpression {
                operator: Self::update_operator(*operation, loc)?,
                prefix: false,
                argument: Box::new(Expression::ident(Self::binding_name(
                    &lvalue.place.identifier,
                    loc,
                )?)),
                loc: None,
            },
            InstructionValue::Call { callee, arguments } => {
                let callee = self.place(callee)?;
                let arguments = arguments
                    .iter()
                    .map(|argument| self.place(argument))
                    .collect::<Result<Vec<_>, _>>()?;
                Expression::CallExpression {
                    callee: Box::new(callee),
                    arguments,
                    loc: None,
                }
            }
            InstructionValue::MethodCall {
                object,
                property,
                arguments,
            } => {
                let object = self.place(object)?;
                let arguments = arguments
                    .iter()
                    .map(|argument| self.place(argument))
                    .collect::<Result<Vec<_>, _>>()?;
                Expression::CallExpression {
                    callee: Box::new(Expression::MemberExpression {
                        object: Box::new(object),
                        property: Box::new(Expression::ident(property)),
                        computed: false,
                        loc: None,
                    }),
                    arguments,
                    loc: None,
                }
            }
            InstructionValue::PropertyLoad { object, property } => Expression::MemberExpression {
                object: Box::new(self.place(object)?),
                property: Box::new(Expression::ident(property)),
                computed: false,
                loc: None,
            },
            InstructionValue::PropertyStore {
                object,
                property,
                value,
            } => {
                let object = self.place(object)?;
                let value = self.place(value)?;
                Expression::AssignmentExpression {
                    operator: AssignmentOperator::Assign,
                    left: Box::new(Expression::MemberExpression {
                        object: Box::new(object),
                        property: Box::new(Expression::ident(property)),
                        computed: false,
                        loc: None,
                    }),
                    right: Box::new(value),
                    loc: None,
                }
            }
            InstructionValue::ComputedLoad { object, property } => {
                let object = self.place(object)?;
                let property = self.place(property)?;
                Expression::MemberExpression {
                    object: Box::new(object),
                    property: Box::new(property),
                    computed: true,
                    loc: None,
                }
            }
            InstructionValue::Object { properties } => Expression::ObjectExpression {
                properties: properties
                    .iter()
                    .map(|(key, value)| {
                        Ok(ast::Property {
                            key: ast::Identifier::new(key),
                            value: self.place(value)?,
                            loc: None,
                        })
                    })
                    .collect::<Result<Vec<_>, CompilerError>>()?,
                loc: None,
            },
            InstructionValue::Array { elements } => Expression::ArrayExpression {
                elements: elements
                    .iter()
                    .map(|element| element.as_ref().map(|place| self.place(place)).transpose())
                    .collect::<Result<Vec<_>, _>>()?,
                loc: None,
            },
            InstructionValue::JsxElement {
                tag,
                attributes,
                children,
            } => Expression::JSXElement {
                name: ast::Identifier::new(tag),
                attributes: attributes
                    .iter()
                    .map(|(name, value)| {
                        Ok(ast::JsxAttribute {
                            name: ast::Identifier::new(name),
                            value: Some(self.place(value)?),
                            loc: None,
                        })
                    })
                    .collect::<Result<Vec<_>, CompilerError>>()?,
                children: children
                    .iter()
                    .map(|child| self.place(child))
                    .collect::<Result<Vec<_>, _>>()?,
                loc: None,
            },
            // The original expression is emitted verbatim; the lowered copy
            // existed for analysis only.
            InstructionValue::FunctionExpression { node, .. } => node.clone(),
            InstructionValue::DeclareLocal { .. }
            | InstructionValue::DeclareContext { .. }
            | InstructionValue::StoreLocal { .. } => {
                return Err(CompilerError::invariant(
                    "declaration reached expression position",
                    Some(loc.clone()),
                ));
            }
        })
    }

    fn update_operator(
        operation: BinaryOperator,
        loc: &SourceLocation,
    ) -> Result<UpdateOperator, CompilerError> {
        match operation {
            BinaryOperator::Add => Ok(UpdateOperator::Increment),
            BinaryOperator::Subtract => Ok(UpdateOperator::Decrement),
            other => Err(CompilerError::invariant(
                format!("update instruction carries non-step operator {other}"),
                Some(loc.clone()),
            )),
        }
    }

    fn lower_terminal(
        &mut self,
        statement: &ReactiveTerminalStatement,
        out: &mut Vec<Statement>,
    ) -> Result<(), CompilerError> {
        match &statement.terminal {
            ReactiveTerminal::Break { label } => out.push(Statement::BreakStatement {
                label: (*label).map(label_identifier),
                loc: loc_option(&statement.loc),
            }),
            ReactiveTerminal::Continue { label } => out.push(Statement::ContinueStatement {
                label: (*label).map(label_identifier),
                loc: loc_option(&statement.loc),
            }),
            ReactiveTerminal::Return { value } => {
                let argument = value.as_ref().map(|value| self.place(value)).transpose()?;
                out.push(Statement::ReturnStatement {
                    argument,
                    loc: loc_option(&statement.loc),
                });
            }
            ReactiveTerminal::Throw { value } => {
                let argument = self.place(value)?;
                out.push(Statement::ThrowStatement {
                    argument,
                    loc: loc_option(&statement.loc),
                });
            }
            ReactiveTerminal::If {
                test,
                consequent,
                alternate,
            } => {
                let test = self.place(test)?;
                let consequent = self.block_statement(consequent)?;
                let alternate = alternate
                    .as_ref()
                    .map(|alternate| self.block_statement(alternate))
                    .transpose()?;
                out.push(Statement::IfStatement {
                    test,
                    consequent: Box::new(consequent),
                    alternate: alternate.map(Box::new),
                    loc: loc_option(&statement.loc),
                });
            }
            ReactiveTerminal::Logical { operator, rhs, .. } => {
                self.lower_logical(*operator, rhs, &statement.loc, out)?;
            }
            ReactiveTerminal::Ternary {
                test,
                consequent,
                alternate,
            } => self.lower_ternary(test, consequent, alternate, &statement.loc, out)?,
            ReactiveTerminal::While {
                test,
                test_value,
                body,
            } => {
                let lowered = self.lower_while(test, test_value, body, &statement.loc)?;
                out.push(apply_label(lowered, statement.label));
            }
            ReactiveTerminal::DoWhile {
                body,
                test,
                test_value,
            } => {
                let lowered =
                    self.lower_do_while(body, test, test_value, statement.label, &statement.loc)?;
                out.push(apply_label(lowered, statement.label));
            }
            ReactiveTerminal::For {
                init,
                test,
                test_value,
                update,
                body,
            } => {
                let lowered = self.lower_for(
                    init,
                    test,
                    test_value,
                    update,
                    body,
                    statement.label,
                    &statement.loc,
                    out,
                )?;
                out.push(apply_label(lowered, statement.label));
            }
            ReactiveTerminal::Label { body } => {
                let block = self.block_statement(body)?;
                out.push(apply_label(block, statement.label));
            }
            ReactiveTerminal::Try {
                body,
                handler_param,
                handler,
            } => {
                let mut block_body = Vec::new();
                self.lower_block(body, &mut block_body)?;
                let param = handler_param
                    .as_ref()
                    .map(|place| {
                        Self::binding_name(&place.identifier, &place.loc)
                            .map(ast::Identifier::new)
                    })
                    .transpose()?;
                let mut handler_body = Vec::new();
                self.lower_block(handler, &mut handler_body)?;
                out.push(Statement::TryStatement {
                    block: ast::BlockStatement {
                        body: block_body,
                        loc: None,
                    },
                    handler: Some(ast::CatchClause {
                        param,
                        body: ast::BlockStatement {
                            body: handler_body,
                            loc: None,
                        },
                        loc: None,
                    }),
                    loc: loc_option(&statement.loc),
                });
            }
        }
        Ok(())
    }

    /// `result` already holds the left value (emitted just before this
    /// terminal). When the right side collapses to one expression the two
    /// emissions fuse back into `result = left <op> right`; otherwise the
    /// short circuit becomes an explicit conditional re-assignment.
    fn lower_logical(
        &mut self,
        operator: LogicalOperator,
        rhs: &[ReactiveStatement],
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
    ) -> Result<(), CompilerError> {
        let result = final_store_target(rhs).ok_or_else(|| {
            CompilerError::invariant("short-circuit arm does not produce a value", Some(loc.clone()))
        })?;

        let mut rhs_statements = Vec::new();
        self.lower_block(rhs, &mut rhs_statements)?;

        if let Some(rhs_value) = collapse_assignment(&mut rhs_statements, &result) {
            if let Some(ResultBinding { kind, init }) = pop_result_binding(out, &result) {
                let fused = Expression::LogicalExpression {
                    operator,
                    left: Box::new(init),
                    right: Box::new(rhs_value),
                    loc: None,
                };
                out.push(ResultBinding { kind, init: fused }.rebuild(&result));
                return Ok(());
            }
            rhs_statements = vec![Statement::ExpressionStatement {
                expression: Expression::AssignmentExpression {
                    operator: AssignmentOperator::Assign,
                    left: Box::new(Expression::ident(result.as_str())),
                    right: Box::new(rhs_value),
                    loc: None,
                },
                loc: None,
            }];
        }

        out.push(Statement::IfStatement {
            test: continue_condition(operator, &result),
            consequent: Box::new(Statement::BlockStatement {
                body: rhs_statements,
                loc: None,
            }),
            alternate: None,
            loc: loc_option(loc),
        });
        Ok(())
    }

    fn lower_ternary(
        &mut self,
        test: &Place,
        consequent: &[ReactiveStatement],
        alternate: &[ReactiveStatement],
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
    ) -> Result<(), CompilerError> {
        let result = final_store_target(consequent)
            .or_else(|| final_store_target(alternate))
            .ok_or_else(|| {
                CompilerError::invariant("ternary arm does not produce a value", Some(loc.clone()))
            })?;
        let test = self.place(test)?;

        let mut consequent_statements = Vec::new();
        self.lower_block(consequent, &mut consequent_statements)?;
        let mut alternate_statements = Vec::new();
        self.lower_block(alternate, &mut alternate_statements)?;

        let consequent_value = collapse_assignment(&mut consequent_statements, &result);
        let alternate_value = collapse_assignment(&mut alternate_statements, &result);
        if let (Some(consequent_value), Some(alternate_value)) = (consequent_value, alternate_value)
        {
            let conditional = Expression::ConditionalExpression {
                test: Box::new(test),
                consequent: Box::new(consequent_value),
                alternate: Box::new(alternate_value),
                loc: None,
            };
            match pop_empty_declaration(out, &result) {
                Some(kind) => out.push(Statement::VariableDeclaration {
                    kind,
                    declarations: vec![ast::VariableDeclarator {
                        id: ast::Identifier::new(result.as_str()),
                        init: Some(conditional),
                        loc: None,
                    }],
                    loc: loc_option(loc),
                }),
                None => out.push(Statement::ExpressionStatement {
                    expression: Expression::AssignmentExpression {
                        operator: AssignmentOperator::Assign,
                        left: Box::new(Expression::ident(result.as_str())),
                        right: Box::new(conditional),
                        loc: None,
                    },
                    loc: loc_option(loc),
                }),
            }
            return Ok(());
        }

        out.push(Statement::IfStatement {
            test,
            consequent: Box::new(Statement::BlockStatement {
                body: consequent_statements,
                loc: None,
            }),
            alternate: Some(Box::new(Statement::BlockStatement {
                body: alternate_statements,
                loc: None,
            })),
            loc: loc_option(loc),
        });
        Ok(())
    }

    fn lower_while(
        &mut self,
        test: &[ReactiveStatement],
        test_value: &Place,
        body: &[ReactiveStatement],
        loc: &SourceLocation,
    ) -> Result<Statement, CompilerError> {
        let mut test_statements = Vec::new();
        self.lower_block(test, &mut test_statements)?;
        let body = self.block_statement(body)?;
        if test_statements.is_empty() {
            let test = self.place(test_value)?;
            return Ok(Statement::WhileStatement {
                test,
                body: Box::new(body),
                loc: loc_option(loc),
            });
        }
        // Condition chain has statements of its own; re-run it at the top
        // of every iteration.
        let test = self.place(test_value)?;
        test_statements.push(break_unless(test));
        test_statements.push(body);
        Ok(Statement::WhileStatement {
            test: Expression::Literal {
                value: LiteralValue::Boolean(true),
                loc: None,
            },
            body: Box::new(Statement::BlockStatement {
                body: test_statements,
                loc: None,
            }),
            loc: loc_option(loc),
        })
    }

    fn lower_do_while(
        &mut self,
        body: &[ReactiveStatement],
        test: &[ReactiveStatement],
        test_value: &Place,
        label: Option<BlockId>,
        loc: &SourceLocation,
    ) -> Result<Statement, CompilerError> {
        let mut body_statements = Vec::new();
        self.lower_block(body, &mut body_statements)?;
        let mut test_statements = Vec::new();
        self.lower_block(test, &mut test_statements)?;
        // The condition chain runs after the body; any statements it needs
        // belong at the body's tail, with the final value in test position.
        // A `continue` in the body must reach that tail, not skip it.
        if !test_statements.is_empty() {
            body_statements = self.guard_loop_tail(body_statements, label);
            body_statements.extend(test_statements);
        }
        let test = self.place(test_value)?;
        Ok(Statement::DoWhileStatement {
            body: Box::new(Statement::BlockStatement {
                body: body_statements,
                loc: None,
            }),
            test,
            loc: loc_option(loc),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_for(
        &mut self,
        init: &[ReactiveStatement],
        test: &[ReactiveStatement],
        test_value: &Place,
        update: &[ReactiveStatement],
        body: &[ReactiveStatement],
        label: Option<BlockId>,
        loc: &SourceLocation,
        out: &mut Vec<Statement>,
    ) -> Result<Statement, CompilerError> {
        let mut init_statements = Vec::new();
        self.lower_block(init, &mut init_statements)?;
        let mut test_statements = Vec::new();
        self.lower_block(test, &mut test_statements)?;
        let mut update_statements = Vec::new();
        self.lower_block(update, &mut update_statements)?;
        let body = self.block_statement(body)?;

        let simple_init = match init_statements.len() {
            0 => Some(None),
            1 => match &init_statements[0] {
                Statement::VariableDeclaration { .. } => {
                    Some(Some(Box::new(ForInit::Declaration(init_statements[0].clone()))))
                }
                Statement::ExpressionStatement { expression, .. } => {
                    Some(Some(Box::new(ForInit::Expression(expression.clone()))))
                }
                _ => None,
            },
            _ => None,
        };
        let simple_update = match update_statements.len() {
            0 => Some(None),
            1 => match &update_statements[0] {
                Statement::ExpressionStatement { expression, .. } => {
                    Some(Some(expression.clone()))
                }
                _ => None,
            },
            _ => None,
        };

        if let (Some(init), Some(update), true) =
            (simple_init, simple_update, test_statements.is_empty())
        {
            let test = self.place(test_value)?;
            return Ok(Statement::ForStatement {
                init,
                test: Some(test),
                update,
                body: Box::new(body),
                loc: loc_option(loc),
            });
        }

        // Irregular shape: run the init ahead of an explicit loop. The
        // update must still run on every path back to the test, including a
        // `continue` out of the body.
        out.extend(init_statements);
        let test = self.place(test_value)?;
        let mut loop_body = test_statements;
        loop_body.push(break_unless(test));

        if let Some(update) = fold_expression_statements(&update_statements) {
            // The update collapses to one expression; the for's update slot
            // is a position `continue` cannot skip.
            loop_body.push(body);
            return Ok(Statement::ForStatement {
                init: None,
                test: None,
                update: Some(update),
                body: Box::new(Statement::BlockStatement {
                    body: loop_body,
                    loc: None,
                }),
                loc: loc_option(loc),
            });
        }

        if update_statements.is_empty() {
            loop_body.push(body);
        } else {
            let mut tail = vec![body];
            tail = self.guard_loop_tail(tail, label);
            loop_body.extend(tail);
            loop_body.extend(update_statements);
        }
        Ok(Statement::WhileStatement {
            test: Expression::Literal {
                value: LiteralValue::Boolean(true),
                loc: None,
            },
            body: Box::new(Statement::BlockStatement {
                body: loop_body,
                loc: None,
            }),
            loc: loc_option(loc),
        })
    }

    /// Wraps loop-body statements in a labeled block and redirects any
    /// `continue` that targets the enclosing loop into a `break` out of that
    /// block, so statements placed after the block still run before the next
    /// iteration. Bodies with no such `continue` are returned untouched.
    fn guard_loop_tail(
        &mut self,
        mut body: Vec<Statement>,
        label: Option<BlockId>,
    ) -> Vec<Statement> {
        let loop_label = label.map(|label| label_identifier(label).name);
        let exit = format!("body{}", self.next_label);
        let mut rewrote = false;
        for statement in &mut body {
            redirect_continues(statement, loop_label.as_deref(), &exit, false, &mut rewrote);
        }
        if !rewrote {
            return body;
        }
        self.next_label += 1;
        vec![Statement::LabeledStatement {
            label: ast::Identifier::new(exit),
            body: Box::new(Statement::BlockStatement { body, loc: None }),
            loc: None,
        }]
    }

    fn lower_scope(
        &mut self,
        scope_block: &ReactiveScopeBlock,
        out: &mut Vec<Statement>,
    ) -> Result<(), CompilerError> {
        let (dependencies, outputs, reassignments) = {
            let scope = scope_block.scope.borrow();
            (
                scope.dependencies.clone(),
                scope.declarations.values().cloned().collect::<Vec<_>>(),
                scope.reassignments.clone(),
            )
        };

        let dependency_base = self.next_slot;
        self.next_slot += dependencies.len();
        let output_base = self.next_slot;
        self.next_slot += outputs.len() + reassignments.len();

        // Outputs live outside the guard.
        for output in &outputs {
            let name = Self::binding_name(output, &SourceLocation::Generated)?;
            if self.hoisted.insert(output.id) {
                out.push(Statement::VariableDeclaration {
                    kind: DeclarationKind::Let,
                    declarations: vec![ast::VariableDeclarator {
                        id: ast::Identifier::new(name),
                        init: None,
                        loc: None,
                    }],
                    loc: None,
                });
            }
        }

        let test = if dependencies.is_empty() {
            // Nothing to compare; recompute only while the slot still holds
            // the never-written sentinel.
            Expression::BinaryExpression {
                operator: BinaryOperator::Equals,
                left: Box::new(cache_slot(output_base)),
                right: Box::new(sentinel()),
                loc: None,
            }
        } else {
            dependencies
                .iter()
                .enumerate()
                .map(|(offset, dependency)| Expression::BinaryExpression {
                    operator: BinaryOperator::NotEquals,
                    left: Box::new(cache_slot(dependency_base + offset)),
                    right: Box::new(dependency_expression(dependency)),
                    loc: None,
                })
                .reduce(|left, right| Expression::LogicalExpression {
                    operator: LogicalOperator::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                    loc: None,
                })
                .ok_or_else(|| {
                    CompilerError::invariant("cache guard produced no comparison", None)
                })?
        };

        let mut recompute = Vec::new();
        self.lower_block(&scope_block.body, &mut recompute)?;
        for (offset, dependency) in dependencies.iter().enumerate() {
            recompute.push(assign_statement(
                cache_slot(dependency_base + offset),
                dependency_expression(dependency),
            ));
        }
        let mut restore = Vec::new();
        for (offset, output) in outputs.iter().chain(reassignments.iter()).enumerate() {
            let name = Self::binding_name(output, &SourceLocation::Generated)?;
            recompute.push(assign_statement(
                cache_slot(output_base + offset),
                Expression::ident(name.as_str()),
            ));
            restore.push(assign_statement(
                Expression::ident(name.as_str()),
                cache_slot(output_base + offset),
            ));
        }

        out.push(Statement::IfStatement {
            test,
            consequent: Box::new(Statement::BlockStatement {
                body: recompute,
                loc: None,
            }),
            alternate: Some(Box::new(Statement::BlockStatement {
                body: restore,
                loc: None,
            })),
            loc: None,
        });
        Ok(())
    }
}

fn label_identifier(label: BlockId) -> ast::Identifier {
    ast::Identifier::new(format!("bb{label}"))
}

fn apply_label(statement: Statement, label: Option<BlockId>) -> Statement {
    match label {
        Some(label) => Statement::LabeledStatement {
            label: label_identifier(label),
            body: Box::new(statement),
            loc: None,
        },
        None => statement,
    }
}

/// Folds a run of expression statements into one expression (a sequence
/// when there are several). Yields nothing if any statement is not a bare
/// expression.
fn fold_expression_statements(statements: &[Statement]) -> Option<Expression> {
    let mut expressions = Vec::with_capacity(statements.len());
    for statement in statements {
        match statement {
            Statement::ExpressionStatement { expression, .. } => {
                expressions.push(expression.clone());
            }
            _ => return None,
        }
    }
    match expressions.len() {
        0 => None,
        1 => expressions.pop(),
        _ => Some(Expression::SequenceExpression {
            expressions,
            loc: None,
        }),
    }
}

/// Rewrites `continue` statements aimed at the enclosing loop into `break`
/// out of the block labeled `exit`. Unlabeled continues inside nested loops
/// belong to those loops and are left alone; labeled ones matching
/// `loop_label` are rewritten at any depth.
fn redirect_continues(
    statement: &mut Statement,
    loop_label: Option<&str>,
    exit: &str,
    nested: bool,
    rewrote: &mut bool,
) {
    match statement {
        Statement::ContinueStatement { label, loc } => {
            let targets_loop = match label {
                None => !nested,
                Some(identifier) => Some(identifier.name.as_str()) == loop_label,
            };
            if targets_loop {
                *rewrote = true;
                let loc = loc.take();
                *statement = Statement::BreakStatement {
                    label: Some(ast::Identifier::new(exit)),
                    loc,
                };
            }
        }
        Statement::BlockStatement { body, .. } => {
            for statement in body {
                redirect_continues(statement, loop_label, exit, nested, rewrote);
            }
        }
        Statement::IfStatement {
            consequent,
            alternate,
            ..
        } => {
            redirect_continues(consequent, loop_label, exit, nested, rewrote);
            if let Some(alternate) = alternate {
                redirect_continues(alternate, loop_label, exit, nested, rewrote);
            }
        }
        Statement::LabeledStatement { body, .. } => {
            redirect_continues(body, loop_label, exit, nested, rewrote);
        }
        Statement::WhileStatement { body, .. }
        | Statement::DoWhileStatement { body, .. }
        | Statement::ForStatement { body, .. } => {
            if loop_label.is_some() {
                redirect_continues(body, loop_label, exit, true, rewrote);
            }
        }
        Statement::TryStatement { block, handler, .. } => {
            for statement in &mut block.body {
                redirect_continues(statement, loop_label, exit, nested, rewrote);
            }
            if let Some(handler) = handler {
                for statement in &mut handler.body.body {
                    redirect_continues(statement, loop_label, exit, nested, rewrote);
                }
            }
        }
        Statement::ExpressionStatement { .. }
        | Statement::VariableDeclaration { .. }
        | Statement::FunctionDeclaration { .. }
        | Statement::ReturnStatement { .. }
        | Statement::BreakStatement { .. }
        | Statement::ThrowStatement { .. }
        | Statement::EmptyStatement { .. } => {}
    }
}

fn break_unless(test: Expression) -> Statement {
    Statement::IfStatement {
        test: Expression::UnaryExpression {
            operator: ast::UnaryOperator::Not,
            argument: Box::new(test),
            loc: None,
        },
        consequent: Box::new(Statement::BreakStatement {
            label: None,
            loc: None,
        }),
        alternate: None,
        loc: None,
    }
}

fn cache_slot(slot: usize) -> Expression {
    Expression::MemberExpression {
        object: Box::new(Expression::ident(CACHE_VAR)),
        property: Box::new(Expression::number(slot as f64)),
        computed: true,
        loc: None,
    }
}

fn sentinel() -> Expression {
    Expression::CallExpression {
        callee: Box::new(Expression::MemberExpression {
            object: Box::new(Expression::ident("Symbol")),
            property: Box::new(Expression::ident("for")),
            computed: false,
            loc: None,
        }),
        arguments: vec![Expression::Literal {
            value: LiteralValue::String(CACHE_SENTINEL.to_owned()),
            loc: None,
        }],
        loc: None,
    }
}

fn assign_statement(left: Expression, right: Expression) -> Statement {
    Statement::ExpressionStatement {
        expression: Expression::AssignmentExpression {
            operator: AssignmentOperator::Assign,
            left: Box::new(left),
            right: Box::new(right),
            loc: None,
        },
        loc: None,
    }
}

fn dependency_expression(dependency: &ReactiveScopeDependency) -> Expression {
    let base = dependency
        .identifier
        .name
        .clone()
        .unwrap_or_else(|| format!("__t{}", dependency.identifier.id));
    dependency
        .path
        .iter()
        .fold(Expression::ident(base), |object, segment| {
            Expression::MemberExpression {
                object: Box::new(object),
                property: Box::new(Expression::ident(segment)),
                computed: false,
                loc: None,
            }
        })
}

/// The variable the last top-level store in a value block writes; value
/// blocks produced by short-circuit and ternary lowering end with one.
fn final_store_target(block: &[ReactiveStatement]) -> Option<String> {
    block.iter().rev().find_map(|statement| match statement {
        ReactiveStatement::Instruction(Instruction {
            value: InstructionValue::StoreLocal { lvalue, .. },
            ..
        }) => lvalue.place.identifier.name.clone(),
        _ => None,
    })
}

/// If the generated statements are exactly one assignment to `result`,
/// removes it and yields the assigned expression.
fn collapse_assignment(statements: &mut Vec<Statement>, result: &str) -> Option<Expression> {
    if statements.len() != 1 {
        return None;
    }
    let Statement::ExpressionStatement {
        expression: Expression::AssignmentExpression { left, right, .. },
        ..
    } = &statements[0]
    else {
        return None;
    };
    if !matches!(left.as_ref(), Expression::Identifier { name, .. } if name == result) {
        return None;
    }
    let value = right.as_ref().clone();
    statements.clear();
    Some(value)
}

/// A just-emitted binding of `result` that a fused expression can replace.
struct ResultBinding {
    kind: Option<DeclarationKind>,
    init: Expression,
}

impl ResultBinding {
    fn rebuild(self, result: &str) -> Statement {
        match self.kind {
            Some(kind) => Statement::VariableDeclaration {
                kind,
                declarations: vec![ast::VariableDeclarator {
                    id: ast::Identifier::new(result),
                    init: Some(self.init),
                    loc: None,
                }],
                loc: None,
            },
            None => Statement::ExpressionStatement {
                expression: Expression::AssignmentExpression {
                    operator: AssignmentOperator::Assign,
                    left: Box::new(Expression::ident(result)),
                    right: Box::new(self.init),
                    loc: None,
                },
                loc: None,
            },
        }
    }
}

fn pop_result_binding(out: &mut Vec<Statement>, result: &str) -> Option<ResultBinding> {
    let binding = match out.last() {
        Some(Statement::VariableDeclaration {
            kind, declarations, ..
        }) if declarations.len() == 1 && declarations[0].id.name == result => ResultBinding {
            kind: Some(*kind),
            init: declarations[0].init.clone()?,
        },
        Some(Statement::ExpressionStatement {
            expression: Expression::AssignmentExpression { left, right, .. },
            ..
        }) if matches!(left.as_ref(), Expression::Identifier { name, .. } if name == result) => {
            ResultBinding {
                kind: None,
                init: right.as_ref().clone(),
            }
        }
        _ => return None,
    };
    out.pop();
    Some(binding)
}

/// Pops a trailing `let result;` so a fused conditional can re-declare it
/// with an initializer.
fn pop_empty_declaration(out: &mut Vec<Statement>, result: &str) -> Option<DeclarationKind> {
    let kind = match out.last() {
        Some(Statement::VariableDeclaration {
            kind, declarations, ..
        }) if declarations.len() == 1
            && declarations[0].id.name == result
            && declarations[0].init.is_none() =>
        {
            *kind
        }
        _ => return None,
    };
    out.pop();
    Some(kind)
}

/// Inline continuation test for a short-circuit whose right side could not
/// collapse to an expression.
fn continue_condition(operator: LogicalOperator, result: &str) -> Expression {
    match operator {
        LogicalOperator::And => Expression::ident(result),
        LogicalOperator::Or => Expression::UnaryExpression {
            operator: ast::UnaryOperator::Not,
            argument: Box::new(Expression::ident(result)),
            loc: None,
        },
        LogicalOperator::NullishCoalescing => Expression::BinaryExpression {
            operator: BinaryOperator::LooseEquals,
            left: Box::new(Expression::ident(result)),
            right: Box::new(Expression::Literal {
                value: LiteralValue::Null,
                loc: None,
            }),
            loc: None,
        },
    }
}
