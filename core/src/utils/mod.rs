pub mod payload_loader;

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use which::which;

/// Resolves the full path to a tool binary.
/// Search order: ./tools/{name} → ./{name} → System PATH
pub fn get_binary_path(tool_name: &str) -> Option<String> {
    let binary_name = if cfg!(target_os = "windows") {
        format!("{}.exe", tool_name)
    } else {
        tool_name.to_string()
    };

    let tools_path = PathBuf::from("./tools").join(&binary_name);
    if tools_path.is_file() {
        return Some(tools_path.to_string_lossy().to_string());
    }

    let local_path = PathBuf::from("./").join(&binary_name);
    if local_path.is_file() {
        return Some(local_path.to_string_lossy().to_string());
    }

    which(&binary_name).ok().map(|p| p.to_string_lossy().to_string())
}

/// Reads a targets file, returning all non-empty trimmed lines.
pub fn read_lines(path: &str) -> io::Result<Vec<String>> {
    let file = File::open(Path::new(path))?;
    let reader = io::BufReader::new(file);
    let lines = reader
        .lines()
        .filter_map(|line| {
            let line = line.ok()?;
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() || trimmed.starts_with('#') { None } else { Some(trimmed) }
        })
        .collect();
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_lines_skips_blank_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http://a.test").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "# staging").unwrap();
        writeln!(file, "  http://b.test  ").unwrap();
        let lines = read_lines(file.path().to_str().unwrap()).unwrap();
        assert_eq!(lines, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn test_missing_binary_is_none() {
        assert!(get_binary_path("definitely-not-a-real-tool-4242").is_none());
    }
}
