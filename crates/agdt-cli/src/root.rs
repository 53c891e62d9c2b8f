use std::path::{Path, PathBuf};

/// Resolve the repository root the default state directory hangs off.
///
/// Priority:
/// 1. `explicit`
/// 2. Walk upward from `cwd` looking for `.git` (a directory, or a file in worktrees)
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_git_root(&cwd).unwrap_or(cwd)
}

fn find_git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}
