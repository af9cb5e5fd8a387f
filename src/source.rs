//! Local file source: turns a checked-out repository directory into a
//! [`RepositorySnapshot`].

use std::path::Path;
use walkdir::WalkDir;

use crate::models::{RepoFile, RepositorySnapshot};

/// Files above this size are skipped.
pub const MAX_FILE_BYTES: u64 = 1_048_576;

/// Walk all text files under `repo_dir`, sorted by repository-relative path.
pub fn walk_repo_files(repo_dir: &Path) -> Vec<RepoFile> {
    let mut files = Vec::new();

    for entry in WalkDir::new(repo_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_or_ignored(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_indexable_file(path) {
            continue;
        }

        match entry.metadata() {
            Ok(meta) if meta.len() > MAX_FILE_BYTES => {
                tracing::debug!("Skipping large file {}", path.display());
                continue;
            }
            Ok(_) => {}
            Err(_) => continue,
        }

        let relative = path
            .strip_prefix(repo_dir)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        // Non-UTF-8 content is not indexable
        if let Ok(text) = std::fs::read_to_string(path) {
            files.push(RepoFile {
                path: relative,
                text,
            });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// Snapshot of a local checkout, ready for ingestion.
pub fn snapshot_from_dir(
    repository_id: &str,
    repo_dir: &Path,
    tech_stack: Vec<String>,
) -> RepositorySnapshot {
    let files = walk_repo_files(repo_dir);
    tracing::info!("Found {} indexable files in {}", files.len(), repo_dir.display());
    RepositorySnapshot {
        repository_id: repository_id.to_string(),
        tech_stack,
        files,
    }
}

fn is_hidden_or_ignored(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir()
        && matches!(
            name.as_ref(),
            "node_modules" | "target" | "dist" | "build" | "__pycache__" | "vendor" | "venv" | "env"
        )
}

fn is_indexable_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if matches!(
        filename.as_ref(),
        "makefile" | "dockerfile" | "gemfile" | "readme" | "license" | "procfile"
    ) {
        return true;
    }

    matches!(
        ext.as_str(),
        "rs" | "py"
            | "js"
            | "mjs"
            | "ts"
            | "tsx"
            | "jsx"
            | "go"
            | "java"
            | "c"
            | "cpp"
            | "cc"
            | "h"
            | "hpp"
            | "cs"
            | "rb"
            | "php"
            | "swift"
            | "kt"
            | "scala"
            | "lua"
            | "sh"
            | "sql"
            | "html"
            | "css"
            | "scss"
            | "xml"
            | "json"
            | "yaml"
            | "yml"
            | "toml"
            | "ini"
            | "md"
            | "rst"
            | "txt"
            | "proto"
            | "graphql"
            | "vue"
            | "svelte"
            | "ex"
            | "exs"
            | "hs"
            | "clj"
            | "tf"
            | "nix"
            | "zig"
            | "dart"
    )
}
