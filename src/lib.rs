//! # Cobble Native Core
//!
//! Native core of the Cobble addon compiler: turns a tree of composable
//! add-on components into declarative asset files plus one executable script
//! bundle for the target engine.
//!
//! ## Two-Phase Invariants
//!
//! 1. **Two environments, one protocol**: the component composition protocol
//!    runs once natively in the build sandbox (`component.rs` driven by
//!    `executor.rs`) and once as generated text inside the engine
//!    (`bootstrap.rs`). The implementations are kept behaviorally identical;
//!    they are never unified across the source-text boundary.
//!
//! 2. **Session-owned state**: the once-key registry and the auto-naming
//!    counter always belong to an explicit session value: one per build,
//!    one per engine session inside the generated bundle. Never ambient.
//!
//! 3. **Marker isolation**: evaluated build text never reaches real engine
//!    modules. Every expression rooted at the `Modules` marker is elided by
//!    `partition.rs` before evaluation and resolved by the banner at run
//!    time.
//!
//! 4. **Loud lifecycle**: double finalize, registration after finalize and
//!    handle use after factory return fail with coded errors; once-key
//!    misses are silent "not created" results, never errors.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod assemble;
mod banner;
mod bootstrap;
mod component;
mod error;
mod executor;
mod manifest;
mod partition;
mod pipeline;
mod session;


pub use assemble::{assemble_bundle, BUNDLE_SCRIPT_PATH};
pub use banner::generate_banner;
pub use bootstrap::synthesize_bootstrap;
pub use component::{
    define_component_factory, produce_component, ArtifactKind, Component, ComponentFactory,
    DeferredCallback, FileArtifact, KindSpec, OutputArea, RegisterOptions, RegistrationHandle,
};
pub use error::{BuildError, ProtocolError};
pub use executor::collect_file_artifacts;
pub use manifest::{load_manifest, Dependency, Manifest, ModuleDependency, PackDependency};
pub use partition::{partition_source, SourcePartition, RUNTIME_MARKER};
pub use pipeline::{build, build_with, BuildOptions, BuildReport, Bundler, FlatFileBundler};
pub use session::Session;

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI EXPORTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn native_bridge() -> String {
    "Cobble Native Bridge Connected".to_string()
}

#[cfg(feature = "napi")]
#[napi]
pub fn build_native(options: serde_json::Value) -> napi::Result<serde_json::Value> {
    let options: BuildOptions =
        serde_json::from_value(options).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let report = build(&options).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    serde_json::to_value(report).map_err(|e| napi::Error::from_reason(e.to_string()))
}

/// Partition bundled source and collect its file artifacts, without touching
/// the file system. Exposed for the CLI's dry-run and test tooling.
#[cfg(feature = "napi")]
#[napi]
pub fn collect_file_artifacts_native(source: String) -> napi::Result<serde_json::Value> {
    let partition = partition_source(&source, "<bundle>")
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let artifacts = collect_file_artifacts(&partition.build)
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    serde_json::to_value(artifacts).map_err(|e| napi::Error::from_reason(e.to_string()))
}

#[cfg(feature = "napi")]
#[napi]
pub fn generate_banner_native(manifest_json: serde_json::Value) -> napi::Result<String> {
    let manifest: Manifest = serde_json::from_value(manifest_json)
        .map_err(|e| napi::Error::from_reason(format!("Invalid manifest: {}", e)))?;
    let modules: Vec<_> = manifest.module_dependencies().collect();
    Ok(generate_banner(&modules))
}
