//! Closure analysis. Each lowered function expression is analysed in
//! isolation (innermost first) to find out what it does to the variables it
//! captures. Captures the closure writes to or mutates get their dependency
//! place in the enclosing function pre-marked `ConditionallyMutate`, so the
//! enclosing effect inference treats calling the closure as a potential
//! mutation of those variables.

use hashbrown::HashSet;

use crate::{
    environment::Environment,
    hir::{shape, Effect, HIRFunction, IdentifierId, InstructionValue, Place},
    inference::{effects, ranges},
};

pub fn analyse_functions(env: &Environment, function: &mut HIRFunction) {
    for block in function.body.blocks.values_mut() {
        for instruction in &mut block.instructions {
            if let InstructionValue::FunctionExpression {
                dependencies,
                lowered,
                ..
            } = &mut instruction.value
            {
                analyse(env, lowered, dependencies);
            }
        }
    }
}

fn analyse(env: &Environment, inner: &mut HIRFunction, dependencies: &mut Vec<Place>) {
    // Grandchildren first, so a closure's summary already accounts for the
    // closures it creates itself.
    analyse_functions(env, inner);

    shape::reverse_postorder_blocks(inner);
    shape::mark_instruction_ids(inner);
    shape::mark_predecessors(inner);
    let kinds = effects::infer_reference_effects(env, inner);
    ranges::infer_mutable_ranges(inner, &kinds);

    let mutated = mutated_context_variables(inner);
    for dependency in dependencies {
        if mutated.contains(&dependency.identifier.id) {
            dependency.effect = Some(Effect::ConditionallyMutate);
        }
    }
}

/// Context variables the closure reassigns or mutates. Context identifiers
/// keep their ids through the inner analysis, so the inner effect results
/// read off directly.
fn mutated_context_variables(inner: &mut HIRFunction) -> HashSet<IdentifierId> {
    let context_ids: HashSet<IdentifierId> =
        inner.context.iter().map(|place| place.identifier.id).collect();
    let mut mutated = HashSet::new();
    for block in inner.body.blocks.values_mut() {
        for instruction in &mut block.instructions {
            instruction.each_operand(|place| {
                if context_ids.contains(&place.identifier.id)
                    && place.effect.is_some_and(Effect::is_mutable)
                {
                    mutated.insert(place.identifier.id);
                }
            });
            instruction.each_store(|lvalue| {
                if context_ids.contains(&lvalue.place.identifier.id) {
                    mutated.insert(lvalue.place.identifier.id);
                }
            });
        }
    }
    mutated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast,
        environment::Config,
        hir::lowering,
    };

    fn analysed(json: &str) -> HIRFunction {
        let ast: ast::Function = serde_json::from_str(json).unwrap();
        let env = Environment::new(Config::default()).unwrap();
        let mut function = lowering::lower(&env, &ast).unwrap();
        shape::reverse_postorder_blocks(&mut function);
        shape::mark_instruction_ids(&mut function);
        shape::mark_predecessors(&mut function);
        analyse_functions(&env, &mut function);
        function
    }

    fn function_dependencies(function: &mut HIRFunction) -> Vec<Place> {
        let mut found = Vec::new();
        for block in function.body.blocks.values_mut() {
            for instruction in &mut block.instructions {
                if let InstructionValue::FunctionExpression { dependencies, .. } =
                    &instruction.value
                {
                    found.extend(dependencies.iter().cloned());
                }
            }
        }
        found
    }

    #[test]
    fn closure_reassigning_a_capture_marks_the_dependency() {
        let mut function = analysed(
            r#"{
                "params": [],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "let",
                     "declarations": [{"id": {"name": "count"},
                                       "init": {"type": "Literal", "value": 0.0}}]},
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "bump"},
                                       "init": {"type": "ArrowFunctionExpression",
                                                "params": [],
                                                "body": {"type": "AssignmentExpression",
                                                         "operator": "=",
                                                         "left": {"type": "Identifier", "name": "count"},
                                                         "right": {"type": "BinaryExpression",
                                                                   "operator": "+",
                                                                   "left": {"type": "Identifier", "name": "count"},
                                                                   "right": {"type": "Literal", "value": 1.0}}}}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "bump"}}
                ]}
            }"#,
        );
        let dependencies = function_dependencies(&mut function);
        let count = dependencies
            .iter()
            .find(|d| d.identifier.name.as_deref() == Some("count"))
            .expect("count is a dependency");
        assert_eq!(count.effect, Some(Effect::ConditionallyMutate));
    }

    #[test]
    fn closure_only_reading_a_capture_leaves_the_dependency_unmarked() {
        let mut function = analysed(
            r#"{
                "params": [{"name": "label"}],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "show"},
                                       "init": {"type": "ArrowFunctionExpression",
                                                "params": [],
                                                "body": {"type": "Identifier", "name": "label"}}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "show"}}
                ]}
            }"#,
        );
        let dependencies = function_dependencies(&mut function);
        let label = dependencies
            .iter()
            .find(|d| d.identifier.name.as_deref() == Some("label"))
            .expect("label is a dependency");
        assert_ne!(label.effect, Some(Effect::ConditionallyMutate));
    }

    #[test]
    fn nested_closures_propagate_mutation_outward() {
        // The outer closure only creates the inner one, but the inner one
        // writes `total`, so both dependency chains end up conditionally
        // mutating.
        let mut function = analysed(
            r#"{
                "params": [],
                "body": {"body": [
                    {"type": "VariableDeclaration", "kind": "let",
                     "declarations": [{"id": {"name": "total"},
                                       "init": {"type": "Literal", "value": 0.0}}]},
                    {"type": "VariableDeclaration", "kind": "const",
                     "declarations": [{"id": {"name": "outer"},
                                       "init": {"type": "ArrowFunctionExpression",
                                                "params": [],
                                                "body": {"type": "ArrowFunctionExpression",
                                                         "params": [],
                                                         "body": {"type": "AssignmentExpression",
                                                                  "operator": "=",
                                                                  "left": {"type": "Identifier", "name": "total"},
                                                                  "right": {"type": "Literal", "value": 1.0}}}}}]},
                    {"type": "ReturnStatement",
                     "argument": {"type": "Identifier", "name": "outer"}}
                ]}
            }"#,
        );
        let dependencies = function_dependencies(&mut function);
        let total = dependencies
            .iter()
            .find(|d| d.identifier.name.as_deref() == Some("total"))
            .expect("total is a dependency of the outer closure");
        assert_eq!(total.effect, Some(Effect::ConditionallyMutate));
    }
}
