//! Per-compilation configuration and shared lookup tables. The environment
//! owns every id allocator so that two functions compiled on different
//! threads never share counter state.

use std::cell::Cell;

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::{
    diagnostics::CompilerError,
    hir::{BlockId, IdentifierId, ScopeId},
    index::Index,
};

/// Flat options record accepted by `compile`. Unrecognized keys are ignored
/// during deserialization; missing keys take the documented defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Only compile functions bearing the explicit `"use memo"` directive.
    pub enable_only_on_directive: bool,
    /// Wrap output in a runtime feature-flag check, falling back to the
    /// original function when the flag is false.
    pub gating: Option<GatingConfig>,
    /// Name of the memo-cache import the generated code calls once per
    /// function.
    pub memo_cache_import: String,
    /// Treat values flowing into JSX as frozen.
    pub enable_jsx_freeze: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatingConfig {
    pub import_specifier_name: String,
    pub source: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_only_on_directive: false,
            gating: None,
            memo_cache_import: "useMemoCache".to_owned(),
            enable_jsx_freeze: true,
        }
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

impl Config {
    /// Fails fast, before lowering begins, on options that cannot produce
    /// valid output.
    pub fn validate(&self) -> Result<(), CompilerError> {
        if !is_valid_identifier(&self.memo_cache_import) {
            return Err(CompilerError::config(format!(
                "memo_cache_import `{}` is not a valid identifier",
                self.memo_cache_import
            )));
        }
        if let Some(gating) = &self.gating {
            if !is_valid_identifier(&gating.import_specifier_name) {
                return Err(CompilerError::config(format!(
                    "gating import specifier `{}` is not a valid identifier",
                    gating.import_specifier_name
                )));
            }
            if gating.source.is_empty() {
                return Err(CompilerError::config("gating source may not be empty"));
            }
        }
        Ok(())
    }
}

/// How the compiler should treat calls to a known global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    /// Never mutates its arguments (`Math.max`, `Object.keys`, ...).
    Pure,
    /// A hook-like function: arguments are frozen by the call, the result is
    /// already immutable.
    Hook,
    /// No signature knowledge; arguments conservatively may be mutated.
    Unknown,
}

static BUILTIN_GLOBALS: Lazy<HashMap<&'static str, GlobalKind>> = Lazy::new(|| {
    let mut globals = HashMap::new();
    for name in [
        "Math", "Object", "JSON", "Number", "String", "Boolean", "Infinity", "NaN", "undefined",
    ] {
        globals.insert(name, GlobalKind::Pure);
    }
    for name in [
        "useState",
        "useReducer",
        "useContext",
        "useRef",
        "useCallback",
        "useMemo",
        "useEffect",
    ] {
        globals.insert(name, GlobalKind::Hook);
    }
    globals.insert("console", GlobalKind::Unknown);
    globals
});

/// Shared state for one function compilation: configuration, the known-global
/// table, and the id allocators threaded through lowering and later passes.
/// There is deliberately no cross-compilation shared mutable state; separate
/// functions may be compiled fully in parallel.
#[derive(Debug)]
pub struct Environment {
    pub config: Config,
    next_identifier: Cell<usize>,
    next_block: Cell<usize>,
    next_scope: Cell<usize>,
}

impl Environment {
    pub fn new(config: Config) -> Result<Self, CompilerError> {
        config.validate()?;
        Ok(Self {
            config,
            next_identifier: Cell::new(0),
            next_block: Cell::new(0),
            next_scope: Cell::new(0),
        })
    }

    pub fn next_identifier_id(&self) -> IdentifierId {
        let id = self.next_identifier.get();
        self.next_identifier.set(id + 1);
        IdentifierId::new(id)
    }

    pub fn next_block_id(&self) -> BlockId {
        let id = self.next_block.get();
        self.next_block.set(id + 1);
        BlockId::new(id)
    }

    pub fn next_scope_id(&self) -> ScopeId {
        let id = self.next_scope.get();
        self.next_scope.set(id + 1);
        ScopeId::new(id)
    }

    /// Signature knowledge for a global by name. Names absent from the
    /// built-in table are `Unknown`, which effect inference treats
    /// conservatively.
    pub fn global_kind(&self, name: &str) -> GlobalKind {
        BUILTIN_GLOBALS.get(name).copied().unwrap_or(GlobalKind::Unknown)
    }

    /// Whether the hooks convention says this name is a hook (`useX`).
    pub fn is_hook_name(&self, name: &str) -> bool {
        name.strip_prefix("use")
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_documented_values() {
        let config = Config::default();
        assert!(!config.enable_only_on_directive);
        assert!(config.gating.is_none());
        assert_eq!(config.memo_cache_import, "useMemoCache");
        assert!(config.enable_jsx_freeze);
    }

    #[test]
    fn unrecognized_keys_are_ignored() {
        let config: Config = serde_json::from_str(
            r#"{"enable_only_on_directive": true, "some_future_flag": 42}"#,
        )
        .unwrap();
        assert!(config.enable_only_on_directive);
    }

    #[test]
    fn invalid_gating_import_fails_validation() {
        let config = Config {
            gating: Some(GatingConfig {
                import_specifier_name: "not an ident".to_owned(),
                source: "featureFlags".to_owned(),
            }),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn allocators_are_per_environment() {
        let a = Environment::new(Config::default()).unwrap();
        let b = Environment::new(Config::default()).unwrap();
        assert_eq!(a.next_identifier_id(), b.next_identifier_id());
        assert_ne!(a.next_identifier_id(), b.next_identifier_id().plus(1));
    }

    #[test]
    fn hook_names_follow_the_use_convention() {
        let env = Environment::new(Config::default()).unwrap();
        assert!(env.is_hook_name("useState"));
        assert!(env.is_hook_name("useTheme"));
        assert!(!env.is_hook_name("user"));
        assert!(!env.is_hook_name("compute"));
    }
}
