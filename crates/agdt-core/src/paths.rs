use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Layout constants
// ---------------------------------------------------------------------------

/// State directory relative to the repository root when not overridden.
pub const DEFAULT_STATE_DIR: &str = "scripts/temp";
/// Prompt template directory relative to the repository root.
pub const DEFAULT_PROMPTS_DIR: &str = "scripts/prompts";

pub const STATE_FILE: &str = "agdt-state.json";
pub const LOCK_SUFFIX: &str = ".lock";
pub const TASKS_DIR: &str = "background-tasks";
pub const REVIEW_PROMPTS_DIR: &str = "pull-request-review/prompts";
pub const QUEUE_FILE: &str = "queue.json";
pub const REVIEWS_DIR: &str = "reviews";
pub const SUMMARY_FILE: &str = "summary.md";

// ---------------------------------------------------------------------------
// Path helpers (all relative to the resolved state directory)
// ---------------------------------------------------------------------------

pub fn state_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATE_FILE)
}

/// Lock file guarding `path`: the same name with `.lock` appended.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(LOCK_SUFFIX);
    path.with_file_name(name)
}

pub fn tasks_dir(state_dir: &Path) -> PathBuf {
    state_dir.join(TASKS_DIR)
}

pub fn task_log_path(state_dir: &Path, task_id: &str) -> PathBuf {
    tasks_dir(state_dir).join(format!("{task_id}.log"))
}

pub fn task_bootstrap_path(state_dir: &Path, task_id: &str) -> PathBuf {
    tasks_dir(state_dir).join(format!("{task_id}.toml"))
}

pub fn review_dir(state_dir: &Path, pr_id: &str) -> PathBuf {
    state_dir.join(REVIEW_PROMPTS_DIR).join(pr_id)
}

pub fn review_queue_path(state_dir: &Path, pr_id: &str) -> PathBuf {
    review_dir(state_dir, pr_id).join(QUEUE_FILE)
}

pub fn review_record_path(state_dir: &Path, pr_id: &str, file_path: &str) -> PathBuf {
    review_dir(state_dir, pr_id)
        .join(REVIEWS_DIR)
        .join(format!("{}.json", sanitize_file_path(file_path)))
}

pub fn review_summary_path(state_dir: &Path, pr_id: &str) -> PathBuf {
    review_dir(state_dir, pr_id).join(SUMMARY_FILE)
}

pub fn rendered_prompt_path(state_dir: &Path, workflow: &str, step: &str) -> PathBuf {
    state_dir.join(format!("temp-{workflow}-{step}-prompt.md"))
}

/// Flatten a repository path into a single file name component.
///
/// `/` becomes `_`; `_`, `%` and anything outside `[A-Za-z0-9.-]` are
/// percent-encoded, so distinct paths never share a file name.
pub fn sanitize_file_path(file_path: &str) -> String {
    let mut out = String::with_capacity(file_path.len());
    for c in file_path.trim_start_matches('/').chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' => out.push(c),
            '/' => out.push('_'),
            _ => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let dir = Path::new("/tmp/repo/scripts/temp");
        assert_eq!(
            state_path(dir),
            PathBuf::from("/tmp/repo/scripts/temp/agdt-state.json")
        );
        assert_eq!(
            lock_path_for(&state_path(dir)),
            PathBuf::from("/tmp/repo/scripts/temp/agdt-state.json.lock")
        );
        assert_eq!(
            task_log_path(dir, "abc"),
            PathBuf::from("/tmp/repo/scripts/temp/background-tasks/abc.log")
        );
        assert_eq!(
            review_queue_path(dir, "42"),
            PathBuf::from("/tmp/repo/scripts/temp/pull-request-review/prompts/42/queue.json")
        );
    }

    #[test]
    fn sanitize_flattens_separators() {
        assert_eq!(sanitize_file_path("/src/lib/mod.rs"), "src_lib_mod.rs");
        assert_eq!(sanitize_file_path("a b/c.py"), "a%20b_c.py");
    }

    #[test]
    fn sanitize_keeps_distinct_paths_distinct() {
        assert_eq!(sanitize_file_path("a/b.rs"), "a_b.rs");
        assert_eq!(sanitize_file_path("a_b.rs"), "a%5Fb.rs");
        assert_eq!(sanitize_file_path("a%5Fb.rs"), "a%255Fb.rs");
        assert_eq!(sanitize_file_path("ü.rs"), "%C3%BC.rs");
    }
}
