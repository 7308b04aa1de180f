//! Output Assembly.
//!
//! Thin final stage: concatenate banner and run-time bundle text (banner
//! strictly first), optionally minify, and write everything into the output
//! layout. File artifacts land under the data or presentation output root
//! according to their area prefix; the assembled script goes to a fixed
//! relative path inside the data area. Artifact writes are parallel; by
//! this point the composition protocol has produced all data and the writes
//! are independent.

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::component::{FileArtifact, OutputArea};
use crate::error::BuildError;

/// Relative script path of the assembled bundle within the data area.
pub const BUNDLE_SCRIPT_PATH: &str = "scripts/main.js";

/// Concatenate banner + bundle. The banner must be the first thing evaluated
/// in the run-time environment.
pub fn assemble_bundle(banner: &str, runtime_text: &str, minify: bool) -> Result<String, BuildError> {
    let assembled = format!("{}\n{}", banner, runtime_text);
    if !minify {
        return Ok(assembled);
    }

    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(true);
    let ret = Parser::new(&allocator, &assembled, source_type).parse();
    if !ret.errors.is_empty() {
        return Err(BuildError::Parse {
            path: BUNDLE_SCRIPT_PATH.to_string(),
            message: ret
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        });
    }
    let minified = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            ..CodegenOptions::default()
        })
        .build(&ret.program)
        .code;
    Ok(minified)
}

fn area_root<'a>(artifact: &FileArtifact, data_out: &'a Path, asset_out: &'a Path) -> &'a Path {
    match artifact.area() {
        OutputArea::Data => data_out,
        OutputArea::Presentation => asset_out,
    }
}

/// Relative path of an artifact inside its area root (the area prefix is
/// consumed by the root mapping).
fn relative_path(artifact: &FileArtifact) -> &str {
    artifact
        .path
        .strip_prefix("data/")
        .or_else(|| artifact.path.strip_prefix("assets/"))
        .unwrap_or(&artifact.path)
}

fn write_file(path: &Path, content: &str) -> Result<(), BuildError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Write all file artifacts into the output layout, in parallel.
pub fn write_artifacts(
    artifacts: &[FileArtifact],
    data_out: &Path,
    asset_out: &Path,
) -> Result<(), BuildError> {
    artifacts.par_iter().try_for_each(|artifact| {
        let target = area_root(artifact, data_out, asset_out).join(relative_path(artifact));
        write_file(&target, &artifact.content)
    })
}

/// Write the assembled bundle to its fixed script path in the data area.
pub fn write_bundle(text: &str, data_out: &Path) -> Result<PathBuf, BuildError> {
    let target = data_out.join(BUNDLE_SCRIPT_PATH);
    write_file(&target, text)?;
    Ok(target)
}

/// Copy the two manifest files into their area roots.
pub fn copy_manifests(
    data_manifest: &Path,
    asset_manifest: &Path,
    data_out: &Path,
    asset_out: &Path,
) -> Result<(), BuildError> {
    for (source, out) in [(data_manifest, data_out), (asset_manifest, asset_out)] {
        fs::create_dir_all(out)?;
        fs::copy(source, out.join("manifest.json"))?;
    }
    Ok(())
}

/// Copy a static asset tree into the presentation area, preserving layout.
pub fn copy_static_tree(source: &Path, asset_out: &Path) -> Result<usize, BuildError> {
    let mut copied = 0;
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| {
            BuildError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "walkdir loop")
            }))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walkdir yields paths under its root");
        let target = asset_out.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &target)?;
        copied += 1;
    }
    Ok(copied)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_comes_first() {
        let assembled = assemble_bundle("// banner", "// bundle", false).unwrap();
        assert!(assembled.starts_with("// banner\n"));
        assert!(assembled.ends_with("// bundle"));
    }

    #[test]
    fn test_minify_shrinks_whitespace() {
        let banner = "const greeting   =   \"hello\";";
        let bundle = "function shout() {\n    return greeting;\n}\nshout();";
        let plain = assemble_bundle(banner, bundle, false).unwrap();
        let minified = assemble_bundle(banner, bundle, true).unwrap();
        assert!(minified.len() < plain.len());
        assert!(minified.contains("hello"));
    }

    #[test]
    fn test_artifact_layout_split_by_area() {
        let dir = tempfile::tempdir().unwrap();
        let data_out = dir.path().join("data_pack");
        let asset_out = dir.path().join("asset_pack");
        let artifacts = vec![
            FileArtifact {
                path: "data/entities/0.json".into(),
                content: "{}".into(),
            },
            FileArtifact {
                path: "assets/particles/1.json".into(),
                content: "{}".into(),
            },
        ];
        write_artifacts(&artifacts, &data_out, &asset_out).unwrap();
        assert!(data_out.join("entities/0.json").is_file());
        assert!(asset_out.join("particles/1.json").is_file());
    }

    #[test]
    fn test_bundle_goes_to_fixed_script_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_bundle("// script", dir.path()).unwrap();
        assert_eq!(path, dir.path().join("scripts/main.js"));
        assert!(path.is_file());
    }

    #[test]
    fn test_static_tree_copy_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("static");
        fs::create_dir_all(source.join("textures/blocks")).unwrap();
        fs::write(source.join("textures/blocks/ore.png"), b"png").unwrap();
        let asset_out = dir.path().join("out");

        let copied = copy_static_tree(&source, &asset_out).unwrap();
        assert_eq!(copied, 1);
        assert!(asset_out.join("textures/blocks/ore.png").is_file());
    }
}
