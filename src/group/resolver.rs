//! File dependency resolution.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-file resolution failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The file could not be read.
    #[error("cannot read {file}: {source}")]
    Io {
        /// File that failed.
        file: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The resolver knows nothing about the file.
    #[error("no dependency information for {0}")]
    UnknownFile(String),
}

/// Resolves the direct dependencies of a source file.
pub trait DependencyResolver: Send + Sync {
    /// Files directly required by `file_name`.
    fn resolve_dependencies(&self, file_name: &str) -> Result<Vec<String>, ResolveError>;
}

/// In-memory dependency map, e.g. loaded from a JSON manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticDependencies {
    files: BTreeMap<String, Vec<String>>,
}

impl StaticDependencies {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the direct dependencies of `file`.
    pub fn with_file<I, S>(mut self, file: impl Into<String>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files
            .insert(file.into(), dependencies.into_iter().map(Into::into).collect());
        self
    }

    /// Number of files with known dependencies.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when no file is known.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl DependencyResolver for StaticDependencies {
    fn resolve_dependencies(&self, file_name: &str) -> Result<Vec<String>, ResolveError> {
        self.files
            .get(file_name)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownFile(file_name.to_string()))
    }
}

/// Reads source files and follows their relative module specifiers.
///
/// Recognizes `import … from '…'`, `export … from '…'`, `import '…'`, `import('…')` and
/// `require('…')`. Bare package specifiers are ignored.
#[derive(Debug, Clone)]
pub struct SourceImportResolver {
    extensions: Vec<String>,
}

impl Default for SourceImportResolver {
    fn default() -> Self {
        Self {
            extensions: ["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl SourceImportResolver {
    /// Resolver with the default script extensions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the extensions tried for extensionless specifiers, in priority order.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    fn locate(&self, base: &Path) -> Option<PathBuf> {
        if base.is_file() {
            return Some(base.to_path_buf());
        }
        let with_ext = self.extensions.iter().map(|ext| {
            let mut name = base.as_os_str().to_owned();
            name.push(".");
            name.push(ext);
            PathBuf::from(name)
        });
        let index = self
            .extensions
            .iter()
            .map(|ext| base.join(format!("index.{ext}")));
        with_ext.chain(index).find(|candidate| candidate.is_file())
    }
}

impl DependencyResolver for SourceImportResolver {
    fn resolve_dependencies(&self, file_name: &str) -> Result<Vec<String>, ResolveError> {
        let content = std::fs::read_to_string(file_name).map_err(|source| ResolveError::Io {
            file: file_name.to_string(),
            source,
        })?;
        let dir = Path::new(file_name).parent().unwrap_or_else(|| Path::new(""));

        let mut out: Vec<String> = Vec::new();
        for specifier in relative_specifiers(&content) {
            let base = normalize(&dir.join(&specifier));
            match self.locate(&base) {
                Some(path) => {
                    let path = path.to_string_lossy().into_owned();
                    if !out.contains(&path) {
                        out.push(path);
                    }
                }
                None => log::debug!("{file_name}: cannot locate module '{specifier}'"),
            }
        }
        Ok(out)
    }
}

/// `from '…'`, `import '…'`, `import('…')` and `require('…')`, not preceded by an identifier
/// character or a member access.
static MODULE_SPECIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^\w$.])(?:from|import|require)\s*(?:\(\s*)?["'`]([^"'`\r\n]+)["'`]"#)
        .expect("module specifier pattern compiles")
});

/// Relative module specifiers in `source`, deduplicated, in order of appearance.
pub fn relative_specifiers(source: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for captures in MODULE_SPECIFIER.captures_iter(source) {
        let Some(specifier) = captures.get(1).map(|m| m.as_str()) else {
            continue;
        };
        let relative = matches!(specifier, "." | "..")
            || specifier.starts_with("./")
            || specifier.starts_with("../");
        if relative && !out.iter().any(|seen| seen == specifier) {
            out.push(specifier.to_string());
        }
    }
    out
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn static_map_resolves_known_files_only() {
        let deps = StaticDependencies::new().with_file("a.ts", ["b.ts"]);
        assert_eq!(
            deps.resolve_dependencies("a.ts").expect("a should resolve"),
            vec!["b.ts".to_string()]
        );
        assert!(matches!(
            deps.resolve_dependencies("z.ts"),
            Err(ResolveError::UnknownFile(file)) if file == "z.ts"
        ));
    }

    #[test]
    fn static_map_loads_from_json() {
        let deps: StaticDependencies =
            serde_json::from_str(r#"{"a.ts":["b.ts"],"b.ts":[]}"#).expect("map should load");
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn extracts_relative_specifiers_in_order() {
        let source = r#"
            import { a } from './a';
            import type { T } from "../types";
            import 'lodash';
            export * from './re-export';
            const lazy = import('./lazy');
            const legacy = require("./legacy");
            const imported = 1; // not an import keyword
            obj.require('./not-a-call');
            import './side-effect';
            import { a as again } from './a';
        "#;
        assert_eq!(
            relative_specifiers(source),
            vec![
                "./a".to_string(),
                "../types".to_string(),
                "./re-export".to_string(),
                "./lazy".to_string(),
                "./legacy".to_string(),
                "./side-effect".to_string(),
            ]
        );
    }

    #[test]
    fn resolves_imports_against_files_on_disk() {
        let tmp = tempdir().expect("tempdir should be created");
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("util")).expect("dirs should be created");
        std::fs::write(
            src.join("main.ts"),
            "import { add } from './math';\nimport * as u from './util';\nimport x from './missing';\n",
        )
        .expect("main should be written");
        std::fs::write(src.join("math.ts"), "export const add = 1;\n").expect("math written");
        std::fs::write(src.join("util").join("index.ts"), "export {};\n").expect("util written");

        let resolver = SourceImportResolver::new();
        let main = src.join("main.ts").to_string_lossy().into_owned();
        let deps = resolver
            .resolve_dependencies(&main)
            .expect("main should resolve");
        assert_eq!(
            deps,
            vec![
                src.join("math.ts").to_string_lossy().into_owned(),
                src.join("util").join("index.ts").to_string_lossy().into_owned(),
            ]
        );

        let missing = src.join("nope.ts").to_string_lossy().into_owned();
        assert!(matches!(
            resolver.resolve_dependencies(&missing),
            Err(ResolveError::Io { .. })
        ));
    }

    #[test]
    fn normalize_folds_parent_dirs() {
        assert_eq!(
            normalize(Path::new("src/a/../b/./c")),
            PathBuf::from("src/b/c")
        );
        assert_eq!(normalize(Path::new("../x")), PathBuf::from("../x"));
    }
}
