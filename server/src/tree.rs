//! Workspace file-tree listing.
//!
//! Produces the nested directory view returned by `GET /api/files` and the
//! `file_tree` viewer message. Hidden entries and common build/dependency
//! directories are skipped, and recursion stops at [`MAX_DEPTH`] levels.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Number of directory levels included below the workspace root.
pub const MAX_DEPTH: usize = 3;

/// Directory and file names never listed.
const IGNORED_NAMES: &[&str] = &["node_modules", "__pycache__", "dist", "build", "target"];

/// Entries of one directory keyed by name, in sorted order.
pub type FileTree = BTreeMap<String, TreeNode>;

/// A single entry in the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    Directory {
        children: FileTree,
    },
    File {
        size: u64,
        /// Modification time in seconds since the Unix epoch.
        modified: f64,
    },
}

/// Lists `root` down to `max_depth` levels.
///
/// # Errors
///
/// Fails only when `root` itself cannot be read. Unreadable entries below it
/// are skipped.
pub fn build_tree(root: &Path, max_depth: usize) -> io::Result<FileTree> {
    let entries = fs::read_dir(root)?;
    Ok(collect(entries, 0, max_depth))
}

fn collect(entries: fs::ReadDir, depth: usize, max_depth: usize) -> FileTree {
    let mut tree = FileTree::new();
    if depth >= max_depth {
        return tree;
    }

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_ignored(&name) {
            continue;
        }

        // Follows symlinks; the depth limit bounds any cycle.
        let metadata = match fs::metadata(entry.path()) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(name = %name, error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_dir() {
            let children = match fs::read_dir(entry.path()) {
                Ok(children) => collect(children, depth + 1, max_depth),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    warn!(path = %entry.path().display(), "Permission denied, skipping directory");
                    FileTree::new()
                }
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "Failed to read directory");
                    FileTree::new()
                }
            };
            tree.insert(name, TreeNode::Directory { children });
        } else {
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or_default();
            tree.insert(
                name,
                TreeNode::File {
                    size: metadata.len(),
                    modified,
                },
            );
        }
    }

    tree
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || IGNORED_NAMES.contains(&name)
}
