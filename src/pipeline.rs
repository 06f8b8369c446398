//! Pass orchestration. `compile` drives a function through lowering, SSA,
//! inference, structure recovery, the reactive-scope passes, and codegen, in
//! an order the passes' preconditions require: effects before ranges, ranges
//! before scope inference, scope insertion before dependency propagation.
//! `compile_with_snapshots` additionally captures a rendering of the program
//! after each pass, which feeds the CLI's `--emit` output and the snapshot
//! tests.

use crate::{
    ast,
    codegen,
    diagnostics::{CompilerError, ErrorCategory},
    environment::{Config, Environment},
    hir::{self, lowering, shape, HIRFunction, ScopeId},
    inference::{effects, functions, ranges},
    reactive::{
        self, align, build, deps, flatten, merge, prune, rename, scopes, ReactiveFunction,
    },
    ssa,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SnapshotKind {
    #[strum(serialize = "hir")]
    Hir,
    #[strum(serialize = "reactive")]
    Reactive,
    #[strum(serialize = "ast")]
    Ast,
}

/// One pass boundary's rendering of the program.
#[derive(Debug, Clone)]
pub struct PassSnapshot {
    pub kind: SnapshotKind,
    pub pass: &'static str,
    pub function: Option<String>,
    pub rendered: String,
}

pub fn compile(function: &ast::Function, config: Config) -> Result<ast::Function, CompilerError> {
    run(function, config, &mut |_| {})
}

pub fn compile_with_snapshots(
    function: &ast::Function,
    config: Config,
) -> (Result<ast::Function, CompilerError>, Vec<PassSnapshot>) {
    let mut snapshots = Vec::new();
    let result = run(function, config, &mut |snapshot| snapshots.push(snapshot));
    (result, snapshots)
}

/// Compiles a named function into the statement that should replace its
/// declaration. With gating configured the output re-selects between the
/// compiled and original versions at runtime; otherwise it is the compiled
/// declaration itself.
pub fn compile_declaration(
    function: &ast::Function,
    config: Config,
) -> Result<ast::Statement, CompilerError> {
    let gating = config.gating.clone();
    let compiled = compile(function, config)?;
    match gating {
        Some(gating) => {
            let id = function.id.as_ref().ok_or_else(|| {
                CompilerError::unsupported(
                    "gating requires a named function declaration",
                    function.loc.clone(),
                )
            })?;
            Ok(codegen::gated_declaration(
                &gating,
                &id.name,
                compiled,
                function.clone(),
            ))
        }
        None => Ok(ast::Statement::FunctionDeclaration { function: compiled }),
    }
}

fn run(
    source: &ast::Function,
    config: Config,
    observe: &mut dyn FnMut(PassSnapshot),
) -> Result<ast::Function, CompilerError> {
    let env = Environment::new(config)?;

    if env.config.enable_only_on_directive && !source.has_opt_in_directive() {
        tracing::debug!(
            function = source.id.as_ref().map(|id| id.name.as_str()),
            "skipping function without opt-in directive"
        );
        return Ok(source.clone());
    }

    let mut function = lowering::lower(&env, source)?;
    hir_snapshot(observe, "lower", &function);

    shape::reverse_postorder_blocks(&mut function);
    shape::mark_instruction_ids(&mut function);
    shape::mark_predecessors(&mut function);
    hir_snapshot(observe, "shape", &function);

    shape::merge_consecutive_blocks(&mut function);
    shape::mark_predecessors(&mut function);
    shape::mark_instruction_ids(&mut function);
    hir_snapshot(observe, "merge_consecutive_blocks", &function);

    let versions = ssa::enter_ssa(&env, &mut function);
    ssa::eliminate_redundant_phi(&mut function);
    hir_snapshot(observe, "enter_ssa", &function);

    functions::analyse_functions(&env, &mut function);
    hir_snapshot(observe, "analyse_functions", &function);

    let kinds = effects::infer_reference_effects(&env, &mut function);
    hir_snapshot(observe, "infer_reference_effects", &function);
    validate_effects(&mut function)?;

    ranges::infer_mutable_ranges(&mut function, &kinds);
    hir_snapshot(observe, "infer_mutable_ranges", &function);

    ssa::leave::leave_ssa(&mut function, &versions);
    hir_snapshot(observe, "leave_ssa", &function);

    scopes::infer_reactive_scope_variables(&env, &mut function);
    hir_snapshot(observe, "infer_reactive_scope_variables", &function);
    validate_scope_ranges(&mut function)?;

    let mut tree = build::build_reactive_function(function)?;
    reactive_snapshot(observe, "build_reactive_function", &tree);

    align::align_reactive_scopes_to_block_scopes(&mut tree);
    reactive_snapshot(observe, "align_reactive_scopes_to_block_scopes", &tree);

    merge::merge_overlapping_reactive_scopes(&mut tree);
    reactive_snapshot(observe, "merge_overlapping_reactive_scopes", &tree);

    build::build_reactive_scopes(&mut tree);
    reactive_snapshot(observe, "build_reactive_scopes", &tree);

    flatten::flatten_reactive_loops(&mut tree);
    reactive_snapshot(observe, "flatten_reactive_loops", &tree);

    deps::propagate_scope_dependencies(&mut tree);
    reactive_snapshot(observe, "propagate_scope_dependencies", &tree);

    prune::prune_unused_labels(&mut tree);
    prune::prune_unused_lvalues(&mut tree);
    prune::prune_unused_scopes(&mut tree);
    reactive_snapshot(observe, "prune", &tree);

    rename::rename_variables(&mut tree);
    reactive_snapshot(observe, "rename_variables", &tree);

    let output = codegen::codegen(&env, tree)?;
    observe(PassSnapshot {
        kind: SnapshotKind::Ast,
        pass: "codegen",
        function: output.id.as_ref().map(|id| id.name.clone()),
        rendered: serde_json::to_string_pretty(&output)
            .map_err(|error| CompilerError::invariant(error.to_string(), None))?,
    });
    tracing::debug!(
        function = output.id.as_ref().map(|id| id.name.as_str()),
        "compilation finished"
    );
    Ok(output)
}

fn hir_snapshot(observe: &mut dyn FnMut(PassSnapshot), pass: &'static str, function: &HIRFunction) {
    tracing::debug!(pass, "pass finished");
    observe(PassSnapshot {
        kind: SnapshotKind::Hir,
        pass,
        function: function.name.clone(),
        rendered: hir::print::print_function(function),
    });
}

fn reactive_snapshot(
    observe: &mut dyn FnMut(PassSnapshot),
    pass: &'static str,
    function: &ReactiveFunction,
) {
    tracing::debug!(pass, "pass finished");
    observe(PassSnapshot {
        kind: SnapshotKind::Reactive,
        pass,
        function: function.name.clone(),
        rendered: reactive::print_reactive_function(function),
    });
}

/// Every operand must carry an inferred effect once effect inference has
/// run; a `None` here means a pass introduced an operand out of band.
fn validate_effects(function: &mut HIRFunction) -> Result<(), CompilerError> {
    let mut error = CompilerError::new(ErrorCategory::Invariant);
    for block in function.body.blocks.values_mut() {
        for instruction in &mut block.instructions {
            instruction.each_operand(|place| {
                if place.effect.is_none() {
                    error.push_detail(
                        format!("operand {} has no inferred effect", place.identifier.id),
                        Some(place.loc.clone()),
                    );
                }
            });
        }
        block.terminal.value.each_operand(|place| {
            if place.effect.is_none() {
                error.push_detail(
                    format!(
                        "terminal operand {} has no inferred effect",
                        place.identifier.id
                    ),
                    Some(place.loc.clone()),
                );
            }
        });
    }
    if error.is_empty() {
        Ok(())
    } else {
        Err(error)
    }
}

/// Scope ranges are half-open instruction intervals; an inverted one would
/// send the tree passes into nonsense spans.
fn validate_scope_ranges(function: &mut HIRFunction) -> Result<(), CompilerError> {
    let mut error = CompilerError::new(ErrorCategory::Invariant);
    let mut seen: hashbrown::HashSet<ScopeId> = hashbrown::HashSet::new();
    function.each_instruction(|instruction| {
        let Some(scope) = instruction.lvalue.identifier.scope() else {
            return;
        };
        let scope = scope.borrow();
        if seen.insert(scope.id) && scope.range.start > scope.range.end {
            error.push_detail(
                format!(
                    "scope @{} has inverted range [{}:{}]",
                    scope.id, scope.range.start, scope.range.end
                ),
                None,
            );
        }
    });
    if error.is_empty() {
        Ok(())
    } else {
        Err(error)
    }
}
