use globset::{Glob, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;
use shiftlint_provider::{Error, Result};
use shiftlint_types::{CancelToken, uri_to_path};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory names never descended into unless the provider config
/// overrides the exclusion set.
pub static DEFAULT_EXCLUDED_DIRS: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "node_modules",
        "vendor",
        ".git",
        "dist",
        "build",
        "target",
        "venv",
        ".venv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});

/// Walks the analysis roots subject to three constraint layers: the
/// search-time file list, the rule-scoped include/exclude paths, and the
/// provider-level excluded directories. Search-time wins, then rule, then
/// provider.
pub struct FileSearcher {
    roots: Vec<PathBuf>,
    excluded_dirs: Vec<String>,
    rule_include: Vec<PathBuf>,
    rule_exclude: Vec<PathBuf>,
}

impl FileSearcher {
    pub fn new(roots: Vec<PathBuf>, excluded_dirs: Vec<String>) -> Self {
        FileSearcher {
            roots,
            excluded_dirs,
            rule_include: Vec::new(),
            rule_exclude: Vec::new(),
        }
    }

    /// Apply rule-scoped path constraints (chain template scope). Entries
    /// may be `file://` URIs or bare paths, absolute or root-relative.
    pub fn with_rule_scope(mut self, include: &[String], exclude: &[String]) -> Self {
        self.rule_include = include.iter().map(|s| uri_to_path(s)).collect();
        self.rule_exclude = exclude.iter().map(|s| uri_to_path(s)).collect();
        self
    }

    /// All candidate files, before any pattern is applied.
    pub fn files(&self, ctx: &CancelToken) -> Result<Vec<PathBuf>> {
        self.matching(ctx, None, None)
    }

    /// Files whose name (or root-relative path) matches `pattern`, further
    /// narrowed by `search_paths` when the caller supplied an explicit
    /// file list.
    pub fn matching(
        &self,
        ctx: &CancelToken,
        pattern: Option<&GlobSet>,
        search_paths: Option<&[PathBuf]>,
    ) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for root in &self.roots {
            let walker = WalkDir::new(root).follow_links(false).into_iter();
            let excluded = &self.excluded_dirs;
            for entry in walker.filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .is_some_and(|name| excluded.iter().any(|ex| ex == name)))
            }) {
                if ctx.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    // Unreadable subtrees are skipped, not fatal
                    Err(_) => continue,
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                if !self.passes_scope(path, root, search_paths) {
                    continue;
                }
                if let Some(set) = pattern
                    && !matches_glob(set, path, root)
                {
                    continue;
                }
                out.push(path.to_path_buf());
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn passes_scope(&self, path: &Path, root: &Path, search_paths: Option<&[PathBuf]>) -> bool {
        // Search-time file list wins over everything else.
        if let Some(paths) = search_paths {
            return paths.iter().any(|p| path_covers(p, path, root));
        }
        if !self.rule_include.is_empty()
            && !self
                .rule_include
                .iter()
                .any(|p| path_covers(p, path, root))
        {
            return false;
        }
        if self.rule_exclude.iter().any(|p| path_covers(p, path, root)) {
            return false;
        }
        true
    }
}

/// True when `scope` names `path` exactly, or is a directory prefix of it.
/// Relative scopes are resolved against the search root.
fn path_covers(scope: &Path, path: &Path, root: &Path) -> bool {
    let scope = if scope.is_absolute() {
        scope.to_path_buf()
    } else {
        root.join(scope)
    };
    let scope = scope.canonicalize().unwrap_or(scope);
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    path == scope || path.starts_with(&scope)
}

fn matches_glob(set: &GlobSet, path: &Path, root: &Path) -> bool {
    if path
        .file_name()
        .is_some_and(|name| set.is_match(Path::new(name)))
    {
        return true;
    }
    match path.strip_prefix(root) {
        Ok(relative) => set.is_match(relative),
        Err(_) => set.is_match(path),
    }
}

/// Compile a single glob pattern, treating a bare name with no meta
/// characters as an exact file-name match.
pub fn compile_pattern(pattern: &str) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let glob = Glob::new(pattern)
        .map_err(|e| Error::Evaluate(format!("invalid file pattern {:?}: {}", pattern, e)))?;
    builder.add(glob);
    builder
        .build()
        .map_err(|e| Error::Evaluate(format!("invalid file pattern {:?}: {}", pattern, e)))
}
