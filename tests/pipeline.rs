//! Pipeline plumbing: snapshot capture, signature preservation, and error
//! reporting through the public surface.

use indoc::indoc;
use pretty_assertions::assert_eq;

use remo::{ast, compile, compile_with_snapshots, Config, ErrorCategory, SnapshotKind};

fn parse(json: &str) -> ast::Function {
    serde_json::from_str(json).expect("test input must parse")
}

fn memoizable() -> ast::Function {
    parse(indoc! {r#"
        {
            "id": {"name": "List"},
            "params": [{"name": "props"}, {"name": "extra"}],
            "async": true,
            "body": {"body": [
                {"type": "VariableDeclaration", "kind": "const",
                 "declarations": [{"id": {"name": "items"},
                                   "init": {"type": "ArrayExpression",
                                            "elements": [{"type": "Identifier", "name": "props"}]}}]},
                {"type": "ReturnStatement",
                 "argument": {"type": "Identifier", "name": "items"}}
            ]}
        }
    "#})
}

#[test]
fn snapshots_flow_from_hir_to_ast() {
    let (result, snapshots) = compile_with_snapshots(&memoizable(), Config::default());
    assert!(result.is_ok());

    let kinds: Vec<_> = snapshots.iter().map(|s| s.kind).collect();
    let first_reactive = kinds
        .iter()
        .position(|k| *k == SnapshotKind::Reactive)
        .expect("reactive stages must be captured");
    assert!(kinds[..first_reactive]
        .iter()
        .all(|k| *k == SnapshotKind::Hir));
    assert_eq!(kinds.last(), Some(&SnapshotKind::Ast));

    for snapshot in &snapshots {
        assert!(
            !snapshot.rendered.is_empty(),
            "pass {} produced an empty rendering",
            snapshot.pass
        );
        assert_eq!(snapshot.function.as_deref(), Some("List"));
    }
}

#[test]
fn signature_survives_compilation() {
    let output = compile(&memoizable(), Config::default()).unwrap();
    assert_eq!(output.id.as_ref().map(|id| id.name.as_str()), Some("List"));
    let params: Vec<_> = output.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(params, ["props", "extra"]);
    assert!(output.is_async);
    assert!(!output.generator);
}

#[test]
fn unsupported_syntax_reports_every_offender() {
    // Two unsupported constructs in one function; the error lists both.
    let source = parse(indoc! {r#"
        {
            "id": {"name": "broken"},
            "params": [],
            "body": {"body": [
                {"type": "ExpressionStatement",
                 "expression": {"type": "UpdateExpression", "operator": "++",
                                "prefix": false,
                                "argument": {"type": "MemberExpression",
                                             "object": {"type": "Identifier", "name": "obj"},
                                             "property": {"type": "Identifier", "name": "n"}}}},
                {"type": "ExpressionStatement",
                 "expression": {"type": "UpdateExpression", "operator": "--",
                                "prefix": true,
                                "argument": {"type": "MemberExpression",
                                             "object": {"type": "Identifier", "name": "obj"},
                                             "property": {"type": "Identifier", "name": "m"}}}},
                {"type": "ReturnStatement"}
            ]}
        }
    "#});
    let error = compile(&source, Config::default()).unwrap_err();
    assert_eq!(error.category, ErrorCategory::UnsupportedSyntax);
    assert!(error.details.len() >= 2, "details: {:?}", error.details);
}

#[test]
fn invalid_configuration_fails_before_lowering() {
    let config = Config {
        memo_cache_import: "not an identifier".to_owned(),
        ..Config::default()
    };
    let error = compile(&memoizable(), config).unwrap_err();
    assert_eq!(error.category, ErrorCategory::InvalidConfig);
}
