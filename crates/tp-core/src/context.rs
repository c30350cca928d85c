use std::fs::File;
use std::io::Read as _;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

const SKIP_DIRS: &[&str] = &[
    ".git",
    "vendor",
    "node_modules",
    ".idea",
    ".vscode",
    "build",
    "dist",
    "out",
    "target",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "pdf", "zip", "exe", "bin", "mp4", "mov", "dll", "so", "dylib",
    "a", "o", "class", "jar", "gz", "tar", "ico", "woff", "woff2",
];

/// Bounded snapshot of small text files under `root`, for the generator.
///
/// Files are visited in file-name order and emitted as
/// `"\n\n# FILE: <rel>\n<content>"`; each file contributes at most
/// `max_bytes_per_file` bytes, and at most `max_files` files are included.
pub fn build_repo_context(root: &Path, max_files: usize, max_bytes_per_file: usize) -> String {
    let mut out = String::new();
    if max_files == 0 {
        return out;
    }
    let mut count = 0;

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry));

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() || has_binary_extension(entry.path()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Some(content) = read_text_prefix(entry.path(), max_bytes_per_file) else {
            continue;
        };
        out.push_str("\n\n# FILE: ");
        out.push_str(&rel.to_string_lossy().replace('\\', "/"));
        out.push('\n');
        out.push_str(&content);
        count += 1;
        if count >= max_files {
            break;
        }
    }
    out
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy().to_lowercase();
    // `.git` is a file inside linked worktrees.
    if name == ".git" {
        return true;
    }
    entry.file_type().is_dir() && SKIP_DIRS.contains(&name.as_str())
}

fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.as_str()))
}

fn read_text_prefix(path: &Path, max_bytes: usize) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut data = Vec::new();
    file.take(u64::try_from(max_bytes).unwrap_or(u64::MAX))
        .read_to_end(&mut data)
        .ok()?;
    if data.contains(&0) {
        return None;
    }
    match String::from_utf8(data) {
        Ok(text) => Some(text),
        // A multi-byte character cut by the byte cap.
        Err(err) if err.utf8_error().error_len().is_none() => {
            let valid = err.utf8_error().valid_up_to();
            let mut bytes = err.into_bytes();
            bytes.truncate(valid);
            String::from_utf8(bytes).ok()
        }
        Err(_) => None,
    }
}
