//! Textual rendering of HIR. `print_function` produces the plain string form
//! used by pass snapshots and diagnostics.

use std::fmt::Write as _;

use itertools::Itertools;

use crate::hir::{
    HIRFunction, Identifier, Instruction, InstructionValue, Phi, Place, PrimitiveValue,
    TerminalValue,
};

impl core::fmt::Display for Identifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}${}", self.id),
            None => write!(f, "t{}", self.id),
        }
    }
}

impl core::fmt::Display for Place {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(effect) = self.effect {
            write!(f, "{effect} ")?;
        }
        write!(f, "{}", self.identifier)
    }
}

impl core::fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PrimitiveValue::Boolean(value) => write!(f, "{value}"),
            PrimitiveValue::Number(value) => write!(f, "{value}"),
            PrimitiveValue::String(value) => write!(f, "{value:?}"),
            PrimitiveValue::Null => f.write_str("null"),
            PrimitiveValue::Undefined => f.write_str("undefined"),
        }
    }
}

impl core::fmt::Display for InstructionValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InstructionValue::Primitive { value } => write!(f, "{value}"),
            InstructionValue::LoadLocal { place } => write!(f, "load {place}"),
            InstructionValue::LoadGlobal { name } => write!(f, "global {name}"),
            InstructionValue::LoadContext { place } => write!(f, "load-context {place}"),
            InstructionValue::DeclareLocal { lvalue } => {
                write!(f, "declare {} {}", lvalue.kind, lvalue.place)
            }
            InstructionValue::DeclareContext { lvalue } => {
                write!(f, "declare-context {} {}", lvalue.kind, lvalue.place)
            }
            InstructionValue::StoreLocal { lvalue, value } => {
                write!(f, "store {} {} = {value}", lvalue.kind, lvalue.place)
            }
            InstructionValue::Binary {
                left,
                operator,
                right,
            } => write!(f, "{left} {operator} {right}"),
            InstructionValue::Unary { operator, operand } => write!(f, "{operator}{operand}"),
            InstructionValue::PrefixUpdate {
                lvalue, operation, ..
            } => write!(f, "{}{}", update_token(*operation), lvalue.place),
            InstructionValue::PostfixUpdate {
                lvalue, operation, ..
            } => write!(f, "{}{}", lvalue.place, update_token(*operation)),
            InstructionValue::Call { callee, arguments } => {
                write!(
                    f,
                    "call {callee}({})",
                    arguments.iter().map(|a| a.to_string()).join(", ")
                )
            }
            InstructionValue::MethodCall {
                object,
                property,
                arguments,
            } => {
                write!(
                    f,
                    "call {object}.{property}({})",
                    arguments.iter().map(|a| a.to_string()).join(", ")
                )
            }
            InstructionValue::PropertyLoad { object, property } => {
                write!(f, "{object}.{property}")
            }
            InstructionValue::PropertyStore {
                object,
                property,
                value,
            } => write!(f, "{object}.{property} = {value}"),
            InstructionValue::ComputedLoad { object, property } => {
                write!(f, "{object}[{property}]")
            }
            InstructionValue::Object { properties } => {
                write!(
                    f,
                    "{{{}}}",
                    properties
                        .iter()
                        .map(|(key, value)| format!("{key}: {value}"))
                        .join(", ")
                )
            }
            InstructionValue::Array { elements } => {
                write!(
                    f,
                    "[{}]",
                    elements
                        .iter()
                        .map(|element| match element {
                            Some(place) => place.to_string(),
                            None => "<hole>".to_owned(),
                        })
                        .join(", ")
                )
            }
            InstructionValue::JsxElement {
                tag,
                attributes,
                children,
            } => {
                write!(f, "jsx <{tag}")?;
                for (name, value) in attributes {
                    write!(f, " {name}={{{value}}}")?;
                }
                if children.is_empty() {
                    write!(f, " />")
                } else {
                    write!(
                        f,
                        ">{}</{tag}>",
                        children.iter().map(|c| format!("{{{c}}}")).join("")
                    )
                }
            }
            InstructionValue::FunctionExpression {
                dependencies,
                lowered,
                ..
            } => {
                write!(
                    f,
                    "function {} deps=[{}]",
                    lowered.name.as_deref().unwrap_or("<anonymous>"),
                    dependencies.iter().map(|d| d.to_string()).join(", ")
                )
            }
        }
    }
}

fn update_token(operation: crate::ast::BinaryOperator) -> &'static str {
    match operation {
        crate::ast::BinaryOperator::Subtract => "--",
        _ => "++",
    }
}

impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} = {}", self.lvalue, self.value)
    }
}

impl core::fmt::Display for TerminalValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TerminalValue::Goto { block, kind } => write!(f, "goto({kind}) bb{block}"),
            TerminalValue::If {
                test,
                consequent,
                alternate,
                fallthrough,
            } => {
                write!(f, "if {test} then bb{consequent} else bb{alternate}")?;
                if let Some(fallthrough) = fallthrough {
                    write!(f, " fallthrough bb{fallthrough}")?;
                }
                Ok(())
            }
            TerminalValue::Logical {
                operator,
                test,
                rhs,
                fallthrough,
            } => write!(f, "logical({operator}) {test} rhs bb{rhs} fallthrough bb{fallthrough}"),
            TerminalValue::Ternary {
                test,
                consequent,
                alternate,
                fallthrough,
            } => write!(
                f,
                "ternary {test} ? bb{consequent} : bb{alternate} fallthrough bb{fallthrough}"
            ),
            TerminalValue::While {
                test,
                body,
                fallthrough,
            } => write!(f, "while test=bb{test} body=bb{body} fallthrough bb{fallthrough}"),
            TerminalValue::DoWhile {
                body,
                test,
                fallthrough,
            } => write!(f, "do-while body=bb{body} test=bb{test} fallthrough bb{fallthrough}"),
            TerminalValue::For {
                init,
                test,
                update,
                body,
                fallthrough,
            } => {
                write!(f, "for init=bb{init} test=bb{test}")?;
                if let Some(update) = update {
                    write!(f, " update=bb{update}")?;
                }
                write!(f, " body=bb{body} fallthrough bb{fallthrough}")
            }
            TerminalValue::Label { block, fallthrough } => {
                write!(f, "label bb{block}")?;
                if let Some(fallthrough) = fallthrough {
                    write!(f, " fallthrough bb{fallthrough}")?;
                }
                Ok(())
            }
            TerminalValue::Try {
                block,
                handler,
                handler_param,
                fallthrough,
            } => {
                write!(f, "try bb{block} catch")?;
                if let Some(param) = handler_param {
                    write!(f, "({param})")?;
                }
                write!(f, " bb{handler} fallthrough bb{fallthrough}")
            }
            TerminalValue::Return { value } => match value {
                Some(value) => write!(f, "return {value}"),
                None => f.write_str("return"),
            },
            TerminalValue::Throw { value } => write!(f, "throw {value}"),
            TerminalValue::Unsupported => f.write_str("unsupported"),
        }
    }
}

impl core::fmt::Display for Phi {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}: phi({})",
            self.id,
            self.operands
                .iter()
                .map(|(block, identifier)| format!("bb{block} => {identifier}"))
                .join(", ")
        )
    }
}

/// Plain-text rendering of a whole function, one instruction per line with
/// its id. This is the form pass snapshots capture.
pub fn print_function(function: &HIRFunction) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "function {}({})",
        function.name.as_deref().unwrap_or("<anonymous>"),
        function.params.iter().map(|p| p.to_string()).join(", ")
    );
    for (id, block) in function.body.blocks.iter() {
        let _ = writeln!(
            out,
            "bb{id} ({}){}:",
            block.kind,
            if block.predecessors.is_empty() {
                String::new()
            } else {
                format!(
                    " preds=[{}]",
                    block.predecessors.iter().map(|p| format!("bb{p}")).join(", ")
                )
            }
        );
        for phi in &block.phis {
            let _ = writeln!(out, "    {phi}");
        }
        for instruction in &block.instructions {
            let _ = writeln!(out, "    [{}] {instruction}", instruction.id);
        }
        let _ = writeln!(out, "    [{}] {}", block.terminal.id, block.terminal.value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast,
        environment::{Config, Environment},
        hir::{lowering, shape},
    };

    #[test]
    fn printed_form_names_blocks_and_instructions() {
        let ast: ast::Function = serde_json::from_str(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "ReturnStatement",
                     "argument": {"type": "MemberExpression",
                                  "object": {"type": "Identifier", "name": "props"},
                                  "property": {"type": "Identifier", "name": "x"}}}
                ]}
            }"#,
        )
        .unwrap();
        let env = Environment::new(Config::default()).unwrap();
        let mut function = lowering::lower(&env, &ast).unwrap();
        shape::reverse_postorder_blocks(&mut function);
        shape::mark_instruction_ids(&mut function);

        let printed = print_function(&function);
        assert!(printed.contains("function <anonymous>(props$0)"));
        assert!(printed.contains("bb0"));
        assert!(printed.contains(".x"));
        assert!(printed.contains("return"));
    }
}
