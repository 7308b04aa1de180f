//! Build pipeline orchestration.
//!
//! Ties the stages together for one build invocation: input checks, bundling
//! (external capability behind the `Bundler` trait), static partition,
//! sandboxed artifact collection, banner generation, assembly and output
//! writes. Everything here is synchronous; a failure at any stage aborts the
//! attempt without rolling back files already written.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::assemble;
use crate::banner::generate_banner;
use crate::error::BuildError;
use crate::executor::collect_file_artifacts;
use crate::manifest::load_manifest;
use crate::partition::partition_source;

// ═══════════════════════════════════════════════════════════════════════════════
// BUNDLER CAPABILITY
// ═══════════════════════════════════════════════════════════════════════════════

/// External bundling capability: entry module in, flat module source out.
/// The JS CLI supplies the real bundler; the default implementation reads a
/// single already-flat entry file, which is all the native tests need.
pub trait Bundler {
    fn bundle(&self, entry: &Path) -> Result<String, BuildError>;
}

/// Single-file passthrough bundler.
pub struct FlatFileBundler;

impl Bundler for FlatFileBundler {
    fn bundle(&self, entry: &Path) -> Result<String, BuildError> {
        Ok(fs::read_to_string(entry)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS & REPORT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    /// Entry module of the addon source tree.
    pub entry: PathBuf,
    /// Manifest of the data-definition pack; its dependencies feed the banner.
    pub data_manifest: PathBuf,
    /// Manifest of the presentation pack.
    pub asset_manifest: PathBuf,
    pub data_out: PathBuf,
    pub asset_out: PathBuf,
    /// Optional static asset tree copied into the presentation area.
    #[serde(default)]
    pub static_assets: Option<PathBuf>,
    #[serde(default)]
    pub minify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub artifacts_written: usize,
    pub static_files_copied: usize,
    pub script_path: PathBuf,
    pub bundle_bytes: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILD
// ═══════════════════════════════════════════════════════════════════════════════

/// Run one whole build with the default bundler.
pub fn build(options: &BuildOptions) -> Result<BuildReport, BuildError> {
    build_with(&FlatFileBundler, options)
}

pub fn build_with(bundler: &dyn Bundler, options: &BuildOptions) -> Result<BuildReport, BuildError> {
    // Missing inputs are reported before any bundling or evaluation.
    for input in [&options.entry, &options.data_manifest, &options.asset_manifest] {
        if !input.exists() {
            return Err(BuildError::InputNotFound(input.clone()));
        }
    }
    if let Some(static_assets) = &options.static_assets {
        if !static_assets.exists() {
            return Err(BuildError::InputNotFound(static_assets.clone()));
        }
    }

    let manifest = load_manifest(&options.data_manifest)?;

    log::info!("bundling {}", options.entry.display());
    let source = bundler.bundle(&options.entry)?;

    let partition = partition_source(&source, &options.entry.display().to_string())?;

    log::info!("collecting file artifacts");
    let artifacts = collect_file_artifacts(&partition.build)?;

    let modules: Vec<_> = manifest.module_dependencies().collect();
    let banner = generate_banner(&modules);
    let bundle = assemble::assemble_bundle(&banner, &partition.runtime, options.minify)?;

    log::info!(
        "writing {} artifact(s) and {} byte bundle",
        artifacts.len(),
        bundle.len()
    );
    assemble::write_artifacts(&artifacts, &options.data_out, &options.asset_out)?;
    assemble::copy_manifests(
        &options.data_manifest,
        &options.asset_manifest,
        &options.data_out,
        &options.asset_out,
    )?;
    let static_files_copied = match &options.static_assets {
        Some(static_assets) => assemble::copy_static_tree(static_assets, &options.asset_out)?,
        None => 0,
    };
    let script_path = assemble::write_bundle(&bundle, &options.data_out)?;

    Ok(BuildReport {
        artifacts_written: artifacts.len(),
        static_files_copied,
        script_path,
        bundle_bytes: bundle.len(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: &str = r#"
        const base = defineComponentFactory((c) => {
            c.entity({ identifier: "demo:sentry" }, { name: "sentry", once: { key: "sentry" } });
            c.particle({ identifier: "demo:spark" }, { name: "spark" });
            c.script((modules) => Modules.core.log("ready"));
        });
        establishAddon(base());
        Modules.core.world.markLoaded();
    "#;

    const DATA_MANIFEST: &str = r#"{
        "dependencies": [
            { "module_name": "engine.core", "version": "1.2.0", "alias": "core" },
            { "uuid": "7b3f9a44-1c2d-4e5f-8a6b-9c0d1e2f3a4b", "version": [1, 0, 0] }
        ]
    }"#;

    fn scaffold(dir: &Path) -> BuildOptions {
        fs::write(dir.join("main.js"), ENTRY).unwrap();
        fs::write(dir.join("data_manifest.json"), DATA_MANIFEST).unwrap();
        fs::write(dir.join("asset_manifest.json"), "{ \"dependencies\": [] }").unwrap();
        BuildOptions {
            entry: dir.join("main.js"),
            data_manifest: dir.join("data_manifest.json"),
            asset_manifest: dir.join("asset_manifest.json"),
            data_out: dir.join("out/data"),
            asset_out: dir.join("out/assets"),
            static_assets: None,
            minify: false,
        }
    }

    #[test]
    fn test_end_to_end_build() {
        let dir = tempfile::tempdir().unwrap();
        let options = scaffold(dir.path());
        let report = build(&options).unwrap();

        assert_eq!(report.artifacts_written, 2);
        assert!(options.data_out.join("entities/sentry.json").is_file());
        assert!(options.asset_out.join("particles/spark.json").is_file());
        assert!(options.data_out.join("manifest.json").is_file());
        assert!(options.asset_out.join("manifest.json").is_file());

        let bundle = fs::read_to_string(report.script_path).unwrap();
        // Banner first, then bootstrap, then the untouched run-time text.
        assert!(bundle.starts_with("import * as __cobble_dep_0 from \"engine.core\";"));
        assert!(bundle.contains("globalThis.Modules = __modules;"));
        assert!(bundle.contains("Modules.core.world.markLoaded();"));
    }

    #[test]
    fn test_missing_entry_fails_before_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = scaffold(dir.path());
        options.entry = dir.path().join("absent.js");
        let err = build(&options).unwrap_err();
        assert!(matches!(err, BuildError::InputNotFound(_)));
    }

    #[test]
    fn test_entry_without_establish_fails() {
        let dir = tempfile::tempdir().unwrap();
        let options = scaffold(dir.path());
        fs::write(&options.entry, "const nothing = 1;").unwrap();
        let err = build(&options).unwrap_err();
        assert!(matches!(err, BuildError::NoAddon));
    }

    #[test]
    fn test_minified_build_still_carries_runtime_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = scaffold(dir.path());
        options.minify = true;
        let report = build(&options).unwrap();
        let bundle = fs::read_to_string(report.script_path).unwrap();
        assert!(bundle.contains("CB-ERR-DOUBLE-ESTABLISH"));
        assert!(bundle.len() < ENTRY.len() + crate::bootstrap::synthesize_bootstrap().len() + 1000);
    }

    #[test]
    fn test_static_assets_are_copied() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = scaffold(dir.path());
        let static_dir = dir.path().join("static");
        fs::create_dir_all(static_dir.join("sounds")).unwrap();
        fs::write(static_dir.join("sounds/hum.ogg"), b"ogg").unwrap();
        options.static_assets = Some(static_dir);

        let report = build(&options).unwrap();
        assert_eq!(report.static_files_copied, 1);
        assert!(options.asset_out.join("sounds/hum.ogg").is_file());
    }
}
