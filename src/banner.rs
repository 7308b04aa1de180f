//! Module-Alias Banner Generator.
//!
//! Turns manifest-declared module dependencies into the import/aliasing
//! preamble of the shipped bundle: one namespace import per module under a
//! synthetic local name, then an immediately-invoked wrapper that freezes
//! the alias→module object, publishes it as `globalThis.Modules` (the same
//! marker identifier the build-time partition elides) and embeds the entire
//! run-time bootstrap so both host bindings exist before the appended bundle
//! starts registering components.

use lazy_static::lazy_static;
use regex::Regex;

use crate::bootstrap::synthesize_bootstrap;
use crate::manifest::ModuleDependency;

lazy_static! {
    /// Alias keys are expected to be identifier-like (dots allowed for raw
    /// module names). Anything else still works as a quoted key, but is
    /// surprising enough to flag.
    static ref ALIAS_KEY_RE: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$.-]*$").unwrap();
}

fn escape_js_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
}

/// Generate the banner text prepended verbatim to the bundle. It must be the
/// first thing evaluated in the run-time environment.
pub fn generate_banner(dependencies: &[&ModuleDependency]) -> String {
    let mut imports = String::new();
    let mut alias_entries = String::new();

    for (i, dependency) in dependencies.iter().enumerate() {
        let local = format!("__cobble_dep_{}", i);
        let key = dependency.alias_key();
        if !ALIAS_KEY_RE.is_match(key) {
            log::warn!("alias key {:?} is not identifier-like", key);
        }
        imports.push_str(&format!(
            "import * as {} from \"{}\";\n",
            local,
            escape_js_string(&dependency.module_name)
        ));
        alias_entries.push_str(&format!(
            "  \"{}\": {},\n",
            escape_js_string(key),
            local
        ));
    }

    format!(
        "{imports}(() => {{\nconst __modules = Object.freeze({{\n{alias_entries}}});\nglobalThis.Modules = __modules;\n{bootstrap}}})();\n",
        imports = imports,
        alias_entries = alias_entries,
        bootstrap = synthesize_bootstrap(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Dependency, Manifest};

    fn module(name: &str, alias: Option<&str>) -> ModuleDependency {
        ModuleDependency {
            module_name: name.to_string(),
            version: serde_json::json!("1.0.0"),
            alias: alias.map(|a| a.to_string()),
        }
    }

    #[test]
    fn test_aliased_module_is_imported_and_mapped() {
        let dep = module("engine.core", Some("core"));
        let banner = generate_banner(&[&dep]);
        assert!(banner.contains("import * as __cobble_dep_0 from \"engine.core\";"));
        assert!(banner.contains("\"core\": __cobble_dep_0,"));
    }

    #[test]
    fn test_missing_alias_falls_back_to_module_name() {
        let dep = module("engine.ui", None);
        let banner = generate_banner(&[&dep]);
        assert!(banner.contains("\"engine.ui\": __cobble_dep_0,"));
    }

    #[test]
    fn test_imports_precede_the_wrapper() {
        let deps = [module("engine.core", Some("core")), module("engine.ui", None)];
        let refs: Vec<_> = deps.iter().collect();
        let banner = generate_banner(&refs);
        let import_pos = banner.find("import * as __cobble_dep_1").unwrap();
        let wrapper_pos = banner.find("(() => {").unwrap();
        assert!(import_pos < wrapper_pos);
    }

    #[test]
    fn test_banner_embeds_bootstrap_and_marker() {
        let banner = generate_banner(&[]);
        assert!(banner.contains("globalThis.Modules = __modules;"));
        assert!(banner.contains("globalThis.establishAddon = establishAddon;"));
        assert!(banner.contains("const onceKeys = new Set();"));
    }

    #[test]
    fn test_pack_dependencies_never_reach_the_banner() {
        let manifest: Manifest = serde_json::from_str(
            r#"{ "dependencies": [
                { "uuid": "f3a1c9d2-8b4e-4f6a-9c1d-7e5b2a8f0c3d", "version": [1, 0, 0] },
                { "module_name": "engine.core", "version": "1.0.0", "alias": "core" }
            ]}"#,
        )
        .unwrap();
        let modules: Vec<_> = manifest.module_dependencies().collect();
        let banner = generate_banner(&modules);
        assert!(banner.contains("engine.core"));
        assert!(!banner.contains("f3a1c9d2"));
    }

    #[test]
    fn test_banner_parses_as_javascript() {
        use oxc_allocator::Allocator;
        use oxc_parser::Parser;
        use oxc_span::SourceType;

        let dep = module("engine.core", Some("core"));
        let banner = generate_banner(&[&dep]);
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &banner, SourceType::default().with_module(true)).parse();
        assert!(ret.errors.is_empty(), "banner must be valid JS: {:?}", ret.errors);
    }

    #[test]
    fn test_dependency_ref_vec_signature_accepts_manifest_iterator() {
        let manifest = Manifest {
            dependencies: vec![Dependency::Module(module("engine.core", Some("core")))],
        };
        let modules: Vec<_> = manifest.module_dependencies().collect();
        assert_eq!(modules.len(), 1);
        let banner = generate_banner(&modules);
        assert!(banner.contains("__cobble_dep_0"));
    }
}
