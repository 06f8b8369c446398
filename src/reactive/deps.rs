//! Dependency propagation. Each scope block must know which outside values
//! it reads so codegen can guard recomputation on exactly those. Property
//! loads into temporaries are traced back to their base identifier, so a
//! read of `t0` where `t0 = props.x` registers the dependency `props.x`
//! rather than all of `props`. A read registers against every enclosing
//! scope whose range the base value was defined before; values produced
//! inside a scope are its own business.

use hashbrown::HashMap;

use crate::{
    hir::{
        Identifier, IdentifierId, Instruction, InstructionValue, Place, ReactiveScopeDependency,
        ScopeRef,
    },
    reactive::{ReactiveFunction, ReactiveStatement},
};

pub fn propagate_scope_dependencies(function: &mut ReactiveFunction) {
    let mut cx = Context {
        temporaries: HashMap::new(),
        frames: Vec::new(),
    };
    visit_block(&mut function.body, &mut cx);
}

/// What a read of an identifier stands for once temporaries are traced.
#[derive(Clone)]
enum Resolution {
    /// A (possibly property-projected) view of a real value.
    Access {
        identifier: Identifier,
        path: Vec<String>,
    },
    /// Constants and globals; never a reactive dependency.
    Opaque,
}

struct Context {
    temporaries: HashMap<IdentifierId, Resolution>,
    frames: Vec<ScopeRef>,
}

impl Context {
    fn resolve(&self, identifier: &Identifier) -> Resolution {
        match self.temporaries.get(&identifier.id) {
            Some(resolution) => resolution.clone(),
            None => Resolution::Access {
                identifier: identifier.clone(),
                path: Vec::new(),
            },
        }
    }

    fn record_read(&mut self, place: &Place) {
        let Resolution::Access { identifier, path } = self.resolve(&place.identifier) else {
            return;
        };
        for frame in &self.frames {
            let mut scope = frame.borrow_mut();
            // Defined before the scope opened means defined outside it.
            if identifier.mutable_range().start < scope.range.start {
                scope.add_dependency(ReactiveScopeDependency {
                    identifier: identifier.clone(),
                    path: path.clone(),
                });
            }
        }
    }
}

fn visit_block(block: &mut Vec<ReactiveStatement>, cx: &mut Context) {
    for statement in block {
        match statement {
            ReactiveStatement::Instruction(instruction) => visit_instruction(instruction, cx),
            ReactiveStatement::Terminal(terminal) => {
                terminal.terminal.each_operand(|place| cx.record_read(place));
                terminal.terminal.each_block(|nested| visit_block(nested, cx));
            }
            ReactiveStatement::Scope(scope_block) => {
                cx.frames.push(std::rc::Rc::clone(&scope_block.scope));
                visit_block(&mut scope_block.body, cx);
                cx.frames.pop();
            }
        }
    }
}

fn visit_instruction(instruction: &mut Instruction, cx: &mut Context) {
    let destination = instruction.lvalue.identifier.id;
    match &instruction.value {
        // Aliases and projections extend the trace instead of counting as
        // reads; the dependency registers where the traced value is used.
        InstructionValue::LoadLocal { place } | InstructionValue::LoadContext { place } => {
            let resolution = cx.resolve(&place.identifier);
            cx.temporaries.insert(destination, resolution);
        }
        InstructionValue::PropertyLoad { object, property } => {
            let mut resolution = cx.resolve(&object.identifier);
            if let Resolution::Access { path, .. } = &mut resolution {
                path.push(property.clone());
            }
            cx.temporaries.insert(destination, resolution);
        }
        InstructionValue::Primitive { .. } | InstructionValue::LoadGlobal { .. } => {
            cx.temporaries.insert(destination, Resolution::Opaque);
        }
        _ => {
            instruction.each_operand(|place| cx.record_read(place));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{align, build::tests::reactive, build, merge, ReactiveFunction};

    fn with_scopes(json: &str) -> ReactiveFunction {
        let mut function = reactive(json);
        align::align_reactive_scopes_to_block_scopes(&mut function);
        merge::merge_overlapping_reactive_scopes(&mut function);
        build::build_reactive_scopes(&mut function);
        propagate_scope_dependencies(&mut function);
        function
    }

    fn scope_dependencies(function: &ReactiveFunction) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        collect(&function.body, &mut out);
        return out;

        fn collect(block: &[ReactiveStatement], out: &mut Vec<Vec<String>>) {
            for statement in block {
                match statement {
                    ReactiveStatement::Scope(scope_block) => {
                        let scope = scope_block.scope.borrow();
                        out.push(
                            scope
                                .dependencies
                                .iter()
                                .map(|d| {
                                    let mut rendered =
                                        d.identifier.name.clone().unwrap_or_default();
                                    for segment in &d.path {
                                        rendered.push('.');
                                        rendered.push_str(segment);
                                    }
                                    rendered
                                })
                                .collect(),
                        );
                        collect(&scope_block.body, out);
                    }
                    ReactiveStatement::Terminal(terminal) => {
                        if let crate::reactive::ReactiveTerminal::If {
                            consequent,
                            alternate,
                            ..
                        } = &terminal.terminal
                        {
                            collect(consequent, out);
                            if let Some(alternate) = alternate {
                                collect(alternate, out);
                            }
                        }
                    }
                    ReactiveStatement::Instruction(_) => {}
                }
            }
        }
    }

    #[test]
    fn property_read_becomes_a_narrow_dependency() {
        let function = with_scopes(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "pair"},
                                       "init": {"type": "ArrayExpression",
                                                "elements": [{"type": "MemberExpression",
                                                              "object": {"type": "Identifier", "name": "props"},
                                                              "property": {"type": "Identifier", "name": "x"}}]}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "pair"}}
                ]}
            }"#,
        );
        let all = scope_dependencies(&function);
        let pair_deps = all.first().expect("pair has a scope");
        assert!(
            pair_deps.contains(&"props.x".to_owned()),
            "deps: {pair_deps:?}"
        );
        assert!(
            !pair_deps.contains(&"props".to_owned()),
            "whole props must not be a dependency: {pair_deps:?}"
        );
    }

    #[test]
    fn values_made_inside_the_scope_are_not_dependencies() {
        let function = with_scopes(
            r#"{
                "params": [],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "inner"},
                                       "init": {"type": "ArrayExpression", "elements": []}}]},
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "outer"},
                                       "init": {"type": "ArrayExpression",
                                                "elements": [{"type": "Identifier", "name": "inner"}]}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "outer"}}
                ]}
            }"#,
        );
        for deps in scope_dependencies(&function) {
            assert!(
                !deps.contains(&"inner".to_owned()),
                "inner is produced by the scope itself: {deps:?}"
            );
        }
    }

    #[test]
    fn literal_operands_never_register() {
        let function = with_scopes(
            r#"{
                "params": [],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "ones"},
                                       "init": {"type": "ArrayExpression",
                                                "elements": [{"type": "Literal", "value": 1.0}]}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "ones"}}
                ]}
            }"#,
        );
        for deps in scope_dependencies(&function) {
            assert!(deps.is_empty(), "a literal-only scope has no deps: {deps:?}");
        }
    }
}
