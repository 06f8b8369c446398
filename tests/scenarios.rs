//! End-to-end scenarios: JSON AST in, compiled JSON AST out, checked
//! through the public `compile` surface only.

use indoc::indoc;
use pretty_assertions::assert_eq;

use remo::{ast, compile, compile_declaration, Config, GatingConfig};

fn parse(json: &str) -> ast::Function {
    serde_json::from_str(json).expect("test input must parse")
}

fn render(function: &ast::Function) -> String {
    serde_json::to_string(function).expect("output must serialize")
}

#[test]
fn postfix_update_keeps_its_order() {
    let source = parse(indoc! {r#"
        {
            "id": {"name": "count"},
            "params": [],
            "body": {"body": [
                {"type": "VariableDeclaration", "kind": "let",
                 "declarations": [{"id": {"name": "i"},
                                   "init": {"type": "Literal", "value": 0.0}}]},
                {"type": "ExpressionStatement",
                 "expression": {"type": "UpdateExpression", "operator": "++",
                                "prefix": false,
                                "argument": {"type": "Identifier", "name": "i"}}},
                {"type": "ReturnStatement",
                 "argument": {"type": "Identifier", "name": "i"}}
            ]}
        }
    "#});
    let output = compile(&source, Config::default()).unwrap();
    let rendered = render(&output);
    assert!(rendered.contains("UpdateExpression"), "{rendered}");
    assert!(rendered.contains("\"prefix\":false"), "{rendered}");
    assert!(rendered.contains("\"operator\":\"++\""), "{rendered}");
}

#[test]
fn prefix_update_stays_prefix() {
    let source = parse(indoc! {r#"
        {
            "id": {"name": "bump"},
            "params": [],
            "body": {"body": [
                {"type": "VariableDeclaration", "kind": "let",
                 "declarations": [{"id": {"name": "i"},
                                   "init": {"type": "Literal", "value": 0.0}}]},
                {"type": "ExpressionStatement",
                 "expression": {"type": "UpdateExpression", "operator": "--",
                                "prefix": true,
                                "argument": {"type": "Identifier", "name": "i"}}},
                {"type": "ReturnStatement",
                 "argument": {"type": "Identifier", "name": "i"}}
            ]}
        }
    "#});
    let output = compile(&source, Config::default()).unwrap();
    let rendered = render(&output);
    assert!(rendered.contains("\"prefix\":true"), "{rendered}");
    assert!(rendered.contains("\"operator\":\"--\""), "{rendered}");
}

#[test]
fn allocating_function_gets_a_memo_scope() {
    let source = parse(indoc! {r#"
        {
            "id": {"name": "Row"},
            "params": [{"name": "props"}],
            "body": {"body": [
                {"type": "VariableDeclaration", "kind": "const",
                 "declarations": [{"id": {"name": "items"},
                                   "init": {"type": "ArrayExpression",
                                            "elements": [{"type": "MemberExpression",
                                                          "object": {"type": "Identifier", "name": "props"},
                                                          "property": {"type": "Identifier", "name": "x"}}]}}]},
                {"type": "ReturnStatement",
                 "argument": {"type": "Identifier", "name": "items"}}
            ]}
        }
    "#});
    let output = compile(&source, Config::default()).unwrap();
    let rendered = render(&output);
    // One cache acquisition, a strict-inequality guard on the dependency,
    // and slot writes on the recompute path.
    assert_eq!(rendered.matches("useMemoCache").count(), 1, "{rendered}");
    assert!(rendered.contains("\"!==\""), "{rendered}");
    assert!(rendered.contains("\"name\":\"$\""), "{rendered}");
    // The narrow dependency is props.x, compared member-wise.
    assert!(rendered.contains("\"name\":\"props\""), "{rendered}");
    assert!(rendered.contains("\"name\":\"x\""), "{rendered}");
}

#[test]
fn dependency_free_scope_guards_on_the_sentinel() {
    let source = parse(indoc! {r#"
        {
            "id": {"name": "constants"},
            "params": [],
            "body": {"body": [
                {"type": "VariableDeclaration", "kind": "const",
                 "declarations": [{"id": {"name": "empty"},
                                   "init": {"type": "ArrayExpression", "elements": []}}]},
                {"type": "ReturnStatement",
                 "argument": {"type": "Identifier", "name": "empty"}}
            ]}
        }
    "#});
    let output = compile(&source, Config::default()).unwrap();
    let rendered = render(&output);
    assert!(rendered.contains("useMemoCache"), "{rendered}");
    assert!(rendered.contains("Symbol"), "{rendered}");
    assert!(rendered.contains("memo.sentinel"), "{rendered}");
}

#[test]
fn plain_arithmetic_is_left_alone() {
    let source = parse(indoc! {r#"
        {
            "id": {"name": "add"},
            "params": [{"name": "a"}, {"name": "b"}],
            "body": {"body": [
                {"type": "ReturnStatement",
                 "argument": {"type": "BinaryExpression", "operator": "+",
                              "left": {"type": "Identifier", "name": "a"},
                              "right": {"type": "Identifier", "name": "b"}}}
            ]}
        }
    "#});
    let output = compile(&source, Config::default()).unwrap();
    assert!(!render(&output).contains("useMemoCache"));
}

#[test]
fn gating_emits_a_runtime_selected_declaration() {
    let source = parse(indoc! {r#"
        {
            "id": {"name": "Row"},
            "params": [{"name": "props"}],
            "body": {"body": [
                {"type": "VariableDeclaration", "kind": "const",
                 "declarations": [{"id": {"name": "items"},
                                   "init": {"type": "ArrayExpression",
                                            "elements": [{"type": "Identifier", "name": "props"}]}}]},
                {"type": "ReturnStatement",
                 "argument": {"type": "Identifier", "name": "items"}}
            ]}
        }
    "#});
    let config = Config {
        gating: Some(GatingConfig {
            import_specifier_name: "isForgetEnabled".to_owned(),
            source: "featureFlags".to_owned(),
        }),
        ..Config::default()
    };
    let statement = compile_declaration(&source, config).unwrap();
    let ast::Statement::VariableDeclaration { declarations, .. } = &statement else {
        panic!("gating must produce a const declaration, got {statement:?}");
    };
    assert_eq!(declarations[0].id.name, "Row");
    let rendered = serde_json::to_string(&statement).unwrap();
    assert!(rendered.contains("ConditionalExpression"), "{rendered}");
    assert!(rendered.contains("isForgetEnabled"), "{rendered}");
    // Both arms are functions: the compiled body and the untouched original.
    assert_eq!(rendered.matches("FunctionExpression").count(), 2, "{rendered}");
}

#[test]
fn directive_mode_skips_unmarked_functions() {
    let source = parse(indoc! {r#"
        {
            "id": {"name": "plain"},
            "params": [{"name": "props"}],
            "body": {"body": [
                {"type": "VariableDeclaration", "kind": "const",
                 "declarations": [{"id": {"name": "items"},
                                   "init": {"type": "ArrayExpression",
                                            "elements": [{"type": "Identifier", "name": "props"}]}}]},
                {"type": "ReturnStatement",
                 "argument": {"type": "Identifier", "name": "items"}}
            ]}
        }
    "#});
    let config = Config {
        enable_only_on_directive: true,
        ..Config::default()
    };
    let output = compile(&source, config).unwrap();
    assert_eq!(
        serde_json::to_value(&output).unwrap(),
        serde_json::to_value(&source).unwrap(),
    );
}

#[test]
fn directive_mode_compiles_marked_functions() {
    let source = parse(indoc! {r#"
        {
            "id": {"name": "marked"},
            "params": [{"name": "props"}],
            "body": {"body": [
                {"type": "ExpressionStatement",
                 "expression": {"type": "Literal", "value": "use memo"}},
                {"type": "VariableDeclaration", "kind": "const",
                 "declarations": [{"id": {"name": "items"},
                                   "init": {"type": "ArrayExpression",
                                            "elements": [{"type": "Identifier", "name": "props"}]}}]},
                {"type": "ReturnStatement",
                 "argument": {"type": "Identifier", "name": "items"}}
            ]}
        }
    "#});
    let config = Config {
        enable_only_on_directive: true,
        ..Config::default()
    };
    let output = compile(&source, config).unwrap();
    assert!(render(&output).contains("useMemoCache"));
}
