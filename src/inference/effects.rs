//! Reference-effect inference. A forward pass over the SSA HIR assigns every
//! `Place` an `Effect` describing how that particular use treats the value:
//! call arguments default to `ConditionallyMutate` unless signature knowledge
//! says otherwise, property-write targets are `Mutate`, values flowing into
//! JSX are frozen. The pass simultaneously tracks an abstract kind per value
//! (immutable / frozen / mutable) which later range inference uses to ignore
//! conditional mutations of values that cannot change.
//!
//! The lattice is deliberately conservative. Where the true behavior is
//! unknown the value is assumed mutable and the reference assumed mutating;
//! over-memoizing is recoverable, a stale value is not.

use hashbrown::HashMap;

use crate::{
    environment::{Environment, GlobalKind},
    hir::{Effect, HIRFunction, IdentifierId, InstructionValue, TerminalValue},
};

/// Abstract kind of a runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Primitives and other values mutation cannot touch.
    Immutable,
    /// Values the render contract forbids mutating: props, hook results,
    /// JSX elements.
    Frozen,
    Mutable,
}

impl ValueKind {
    fn join(self, other: ValueKind) -> ValueKind {
        match (self, other) {
            (ValueKind::Mutable, _) | (_, ValueKind::Mutable) => ValueKind::Mutable,
            (ValueKind::Frozen, _) | (_, ValueKind::Frozen) => ValueKind::Frozen,
            (ValueKind::Immutable, ValueKind::Immutable) => ValueKind::Immutable,
        }
    }
}

/// Inferred kinds by identifier, queryable after the pass. Unknown
/// identifiers report `Mutable`.
#[derive(Debug, Default)]
pub struct InferredKinds {
    map: HashMap<IdentifierId, ValueKind>,
}

impl InferredKinds {
    pub fn kind(&self, id: IdentifierId) -> ValueKind {
        self.map.get(&id).copied().unwrap_or(ValueKind::Mutable)
    }

    fn set(&mut self, id: IdentifierId, kind: ValueKind) -> bool {
        match self.map.insert(id, kind) {
            Some(previous) => previous != kind,
            None => true,
        }
    }
}

pub fn infer_reference_effects(env: &Environment, function: &mut HIRFunction) -> InferredKinds {
    let mut kinds = InferredKinds::default();
    // Destination temporaries holding a bare global, so calls can consult
    // signature knowledge for `useState(...)` or `Math.max(...)`.
    let mut globals: HashMap<IdentifierId, String> = HashMap::new();

    for place in &mut function.params {
        place.effect = Some(Effect::Freeze);
        kinds.set(place.identifier.id, ValueKind::Frozen);
    }
    for place in &mut function.context {
        place.effect = Some(Effect::Capture);
        kinds.set(place.identifier.id, ValueKind::Mutable);
    }

    // Kinds can change across loop back edges (a phi over an
    // immutable initial value and a mutable loop-carried one); iterate to a
    // fixpoint. Effects are a function of kinds, so rewriting them each round
    // converges with the kinds.
    loop {
        let mut changed = false;

        for block in function.body.blocks.values_mut() {
            for phi in &block.phis {
                let mut joined: Option<ValueKind> = None;
                for operand in phi.operands.values() {
                    if let Some(&kind) = kinds.map.get(&operand.id) {
                        joined = Some(match joined {
                            None => kind,
                            Some(existing) => existing.join(kind),
                        });
                    }
                }
                if let Some(kind) = joined {
                    changed |= kinds.set(phi.id.id, kind);
                }
            }

            for instruction in &mut block.instructions {
                let destination = instruction.lvalue.identifier.id;
                instruction.lvalue.effect = Some(Effect::Store);

                let result = match &mut instruction.value {
                    InstructionValue::Primitive { .. } => ValueKind::Immutable,
                    InstructionValue::LoadGlobal { name } => {
                        globals.insert(destination, name.clone());
                        ValueKind::Frozen
                    }
                    InstructionValue::LoadLocal { place } => {
                        place.effect = Some(Effect::Read);
                        kinds.kind(place.identifier.id)
                    }
                    InstructionValue::LoadContext { place } => {
                        place.effect = Some(Effect::Read);
                        ValueKind::Mutable
                    }
                    InstructionValue::DeclareLocal { lvalue } => {
                        lvalue.place.effect = Some(Effect::Store);
                        kinds.set(lvalue.place.identifier.id, ValueKind::Immutable);
                        ValueKind::Immutable
                    }
                    InstructionValue::DeclareContext { lvalue } => {
                        lvalue.place.effect = Some(Effect::Store);
                        kinds.set(lvalue.place.identifier.id, ValueKind::Mutable);
                        ValueKind::Mutable
                    }
                    InstructionValue::StoreLocal { lvalue, value } => {
                        value.effect = Some(Effect::Capture);
                        lvalue.place.effect = Some(Effect::Store);
                        let kind = kinds.kind(value.identifier.id);
                        changed |= kinds.set(lvalue.place.identifier.id, kind);
                        kind
                    }
                    InstructionValue::Binary { left, right, .. } => {
                        left.effect = Some(Effect::Read);
                        right.effect = Some(Effect::Read);
                        ValueKind::Immutable
                    }
                    InstructionValue::Unary { operand, .. } => {
                        operand.effect = Some(Effect::Read);
                        ValueKind::Immutable
                    }
                    InstructionValue::PrefixUpdate { lvalue, value, .. }
                    | InstructionValue::PostfixUpdate { lvalue, value, .. } => {
                        value.effect = Some(Effect::Read);
                        lvalue.place.effect = Some(Effect::Store);
                        kinds.set(lvalue.place.identifier.id, ValueKind::Immutable);
                        ValueKind::Immutable
                    }
                    InstructionValue::Call { callee, arguments } => {
                        callee.effect = Some(Effect::Read);
                        let signature = globals
                            .get(&callee.identifier.id)
                            .map(|name| {
                                if env.is_hook_name(name) {
                                    GlobalKind::Hook
                                } else {
                                    env.global_kind(name)
                                }
                            })
                            .unwrap_or(GlobalKind::Unknown);
                        match signature {
                            GlobalKind::Pure => {
                                for argument in arguments {
                                    argument.effect = Some(Effect::Read);
                                }
                                ValueKind::Immutable
                            }
                            GlobalKind::Hook => {
                                // Hook arguments are frozen by the call and
                                // the result arrives already immutable.
                                for argument in arguments {
                                    argument.effect = Some(Effect::Freeze);
                                }
                                ValueKind::Frozen
                            }
                            GlobalKind::Unknown => {
                                for argument in arguments {
                                    argument.effect = Some(Effect::ConditionallyMutate);
                                }
                                ValueKind::Mutable
                            }
                        }
                    }
                    InstructionValue::MethodCall {
                        object, arguments, ..
                    } => {
                        let signature = globals
                            .get(&object.identifier.id)
                            .map(|name| env.global_kind(name))
                            .unwrap_or(GlobalKind::Unknown);
                        match signature {
                            GlobalKind::Pure => {
                                object.effect = Some(Effect::Read);
                                for argument in arguments {
                                    argument.effect = Some(Effect::Read);
                                }
                                ValueKind::Immutable
                            }
                            _ => {
                                // `list.push(x)` both mutates the receiver
                                // and stores an alias to the argument.
                                object.effect = Some(Effect::ConditionallyMutate);
                                for argument in arguments {
                                    argument.effect = Some(Effect::Capture);
                                }
                                ValueKind::Mutable
                            }
                        }
                    }
                    InstructionValue::PropertyLoad { object, .. } => {
                        object.effect = Some(Effect::Read);
                        property_result(kinds.kind(object.identifier.id))
                    }
                    InstructionValue::ComputedLoad { object, property } => {
                        object.effect = Some(Effect::Read);
                        property.effect = Some(Effect::Read);
                        property_result(kinds.kind(object.identifier.id))
                    }
                    InstructionValue::PropertyStore { object, value, .. } => {
                        object.effect = Some(Effect::Mutate);
                        value.effect = Some(Effect::Capture);
                        kinds.kind(value.identifier.id)
                    }
                    InstructionValue::Object { properties } => {
                        for (_, value) in properties {
                            value.effect = Some(Effect::Capture);
                        }
                        ValueKind::Mutable
                    }
                    InstructionValue::Array { elements } => {
                        for element in elements.iter_mut().flatten() {
                            element.effect = Some(Effect::Capture);
                        }
                        ValueKind::Mutable
                    }
                    InstructionValue::JsxElement {
                        attributes,
                        children,
                        ..
                    } => {
                        let effect = if env.config.enable_jsx_freeze {
                            Effect::Freeze
                        } else {
                            Effect::Capture
                        };
                        for (_, value) in attributes {
                            value.effect = Some(effect);
                        }
                        for child in children {
                            child.effect = Some(effect);
                        }
                        ValueKind::Frozen
                    }
                    InstructionValue::FunctionExpression { dependencies, .. } => {
                        for dependency in dependencies {
                            // `analyse_functions` pre-marks captures the
                            // inner function writes to; the rest capture, or
                            // conditionally mutate when the captured value is
                            // itself mutable (a captured ref may be poked at
                            // any time the closure runs).
                            if dependency.effect != Some(Effect::ConditionallyMutate) {
                                dependency.effect =
                                    match kinds.kind(dependency.identifier.id) {
                                        ValueKind::Mutable => Some(Effect::ConditionallyMutate),
                                        _ => Some(Effect::Capture),
                                    };
                            }
                        }
                        ValueKind::Mutable
                    }
                };

                changed |= kinds.set(destination, result);
            }

            let terminal_effect = match &block.terminal.value {
                TerminalValue::Return { .. } => Effect::Freeze,
                _ => Effect::Read,
            };
            block
                .terminal
                .value
                .each_operand(|place| place.effect = Some(terminal_effect));
        }

        if !changed {
            return kinds;
        }
    }
}

fn property_result(object: ValueKind) -> ValueKind {
    match object {
        // A member of a frozen aggregate is itself frozen; a member of a
        // mutable one may alias mutable state.
        ValueKind::Frozen => ValueKind::Frozen,
        ValueKind::Immutable => ValueKind::Immutable,
        ValueKind::Mutable => ValueKind::Mutable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast,
        environment::Config,
        hir::{lowering, shape},
        ssa,
    };

    fn inferred(json: &str) -> (HIRFunction, InferredKinds) {
        let ast: ast::Function = serde_json::from_str(json).unwrap();
        let env = Environment::new(Config::default()).unwrap();
        let mut function = lowering::lower(&env, &ast).unwrap();
        shape::reverse_postorder_blocks(&mut function);
        shape::mark_instruction_ids(&mut function);
        shape::mark_predecessors(&mut function);
        ssa::enter_ssa(&env, &mut function);
        ssa::eliminate_redundant_phi(&mut function);
        let kinds = infer_reference_effects(&env, &mut function);
        (function, kinds)
    }

    #[test]
    fn every_place_has_an_effect_after_inference() {
        let (mut function, _) = inferred(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "x"},
                                       "init": {"type": "MemberExpression",
                                                "object": {"type": "Identifier", "name": "props"},
                                                "property": {"type": "Identifier", "name": "x"}}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "x"}}
                ]}
            }"#,
        );
        for block in function.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                assert!(instruction.lvalue.effect.is_some());
                instruction.each_operand(|place| assert!(place.effect.is_some()));
                instruction.each_store(|lvalue| assert!(lvalue.place.effect.is_some()));
            }
            block
                .terminal
                .value
                .each_operand(|place| assert!(place.effect.is_some()));
        }
    }

    #[test]
    fn property_of_frozen_props_is_frozen() {
        let (mut function, kinds) = inferred(
            r#"{
                "params": [{"name": "props"}],
                "body": {"body": [
                    {"type": "ReturnStatement",
                     "argument": {"type": "MemberExpression",
                                  "object": {"type": "Identifier", "name": "props"},
                                  "property": {"type": "Identifier", "name": "x"}}}
                ]}
            }"#,
        );
        let mut found = false;
        for block in function.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                if matches!(instruction.value, InstructionValue::PropertyLoad { .. }) {
                    assert_eq!(
                        kinds.kind(instruction.lvalue.identifier.id),
                        ValueKind::Frozen
                    );
                    found = true;
                }
            }
        }
        assert!(found);
    }

    #[test]
    fn unknown_call_arguments_conditionally_mutate() {
        let (mut function, _) = inferred(
            r#"{
                "params": [{"name": "helper"}, {"name": "value"}],
                "body": {"body": [
                    {"type": "ExpressionStatement",
                     "expression": {"type": "CallExpression",
                                    "callee": {"type": "Identifier", "name": "helper"},
                                    "arguments": [{"type": "Identifier", "name": "value"}]}}
                ]}
            }"#,
        );
        let mut effects = Vec::new();
        for block in function.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                if let InstructionValue::Call { arguments, .. } = &instruction.value {
                    effects.extend(arguments.iter().map(|a| a.effect));
                }
            }
        }
        assert_eq!(effects, vec![Some(Effect::ConditionallyMutate)]);
    }

    #[test]
    fn hook_results_are_frozen_and_arguments_freeze() {
        let (mut function, kinds) = inferred(
            r#"{
                "params": [],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "state"},
                                       "init": {"type": "CallExpression",
                                                "callee": {"type": "Identifier", "name": "useState"},
                                                "arguments": [{"type": "ObjectExpression",
                                                               "properties": []}]}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "state"}}
                ]}
            }"#,
        );
        for block in function.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                if let InstructionValue::Call { arguments, .. } = &instruction.value {
                    assert_eq!(arguments[0].effect, Some(Effect::Freeze));
                    assert_eq!(
                        kinds.kind(instruction.lvalue.identifier.id),
                        ValueKind::Frozen
                    );
                }
            }
        }
    }

    #[test]
    fn method_call_receiver_may_be_mutated() {
        let (mut function, _) = inferred(
            r#"{
                "params": [{"name": "item"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "list"},
                                       "init": {"type": "ArrayExpression", "elements": []}}]},
                    {"type": "ExpressionStatement",
                     "expression": {"type": "CallExpression",
                                    "callee": {"type": "MemberExpression",
                                               "object": {"type": "Identifier", "name": "list"},
                                               "property": {"type": "Identifier", "name": "push"}},
                                    "arguments": [{"type": "Identifier", "name": "item"}]}},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "list"}}
                ]}
            }"#,
        );
        let mut receiver_effect = None;
        for block in function.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                if let InstructionValue::MethodCall { object, .. } = &instruction.value {
                    receiver_effect = object.effect;
                }
            }
        }
        assert_eq!(receiver_effect, Some(Effect::ConditionallyMutate));
    }
}
