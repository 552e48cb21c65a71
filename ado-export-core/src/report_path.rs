use std::path::{Path, PathBuf};

const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Drops characters that are not allowed in a file name on common platforms.
pub fn sanitize_for_file_system(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && !INVALID_FILE_NAME_CHARS.contains(c))
        .collect()
}

/// First free `<folder>/<project>.xlsx`, then `<project> (1).xlsx`, `<project> (2).xlsx`, ...
pub fn unique_report_path(folder: &Path, project: &str) -> PathBuf {
    let stem = match sanitize_for_file_system(project) {
        s if s.trim().is_empty() => "report".to_string(),
        s => s,
    };
    let mut index = 0;
    loop {
        let file_name = if index == 0 {
            format!("{stem}.xlsx")
        } else {
            format!("{stem} ({index}).xlsx")
        };
        let candidate = folder.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}
