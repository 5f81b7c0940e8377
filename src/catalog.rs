use std::path::Path;

use crate::zip::{EndCentralDirectoryInfo, ZipEntryDescriptor};

/// Immutable listing of a remote archive taken at one point in time.
#[derive(Debug, Clone)]
pub struct ZipCatalog {
    remote_path: String,
    file_size: u64,
    end_of_central_dir: EndCentralDirectoryInfo,
    entries: Vec<ZipEntryDescriptor>,
}

impl ZipCatalog {
    pub fn new(
        remote_path: String,
        file_size: u64,
        end_of_central_dir: EndCentralDirectoryInfo,
        entries: Vec<ZipEntryDescriptor>,
    ) -> Self {
        Self {
            remote_path,
            file_size,
            end_of_central_dir,
            entries,
        }
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn end_of_central_dir(&self) -> &EndCentralDirectoryInfo {
        &self.end_of_central_dir
    }

    /// Entries in central directory order.
    pub fn entries(&self) -> &[ZipEntryDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, file_name: &str) -> Option<&ZipEntryDescriptor> {
        self.entries.iter().find(|e| e.file_name == file_name)
    }

    /// File entries matching any of `patterns`, or all files when `patterns` is empty.
    ///
    /// A pattern with `*` or `?` is matched as a glob against the full name;
    /// otherwise it must equal the full name or its base name. Directory
    /// entries are never selected.
    pub fn select<S: AsRef<str>>(&self, patterns: &[S]) -> Vec<ZipEntryDescriptor> {
        self.entries
            .iter()
            .filter(|e| !e.is_directory())
            .filter(|e| patterns.is_empty() || patterns.iter().any(|p| matches_pattern(p.as_ref(), &e.file_name)))
            .cloned()
            .collect()
    }
}

fn matches_pattern(pattern: &str, file_name: &str) -> bool {
    if has_glob_chars(pattern) {
        return glob_match(pattern, file_name);
    }

    let basename = Path::new(file_name)
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    file_name == pattern || basename == pattern
}

/// Check if a pattern contains glob wildcard characters.
pub fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::CompressionMethod;
    use rstest::rstest;

    #[rstest]
    #[case("*.txt", "readme.txt", true)]
    #[case("file?.dat", "file1.dat", true)]
    #[case("*.txt", "readme.md", false)]
    #[case("lib/*/x.so", "lib/arm64/x.so", true)]
    fn test_glob_match(#[case] pattern: &str, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(glob_match(pattern, text), expected);
    }

    fn catalog() -> ZipCatalog {
        let entry = |name: &str, offset: u64| ZipEntryDescriptor {
            file_name: name.to_string(),
            crc: 0,
            compressed_size: 1,
            uncompressed_size: 1,
            local_header_offset: offset,
            compression_method: CompressionMethod::Stored,
            is_zip64: false,
        };
        let eocd = EndCentralDirectoryInfo {
            central_dir_offset: 300,
            central_dir_size: 0,
            entry_count: 3,
            eocd_offset: 300,
            is_zip64: false,
        };
        ZipCatalog::new(
            "archive.zip".to_string(),
            322,
            eocd,
            vec![entry("bin/", 0), entry("bin/tool", 100), entry("readme.txt", 200)],
        )
    }

    #[test]
    fn test_select_skips_directories() {
        let names: Vec<_> = catalog()
            .select::<&str>(&[])
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(names, vec!["bin/tool", "readme.txt"]);
    }

    #[test]
    fn test_select_by_basename_and_glob() {
        let catalog = catalog();
        assert_eq!(catalog.select(&["tool"])[0].file_name, "bin/tool");
        assert_eq!(catalog.select(&["*.txt"])[0].file_name, "readme.txt");
        assert!(catalog.select(&["missing"]).is_empty());
        assert!(catalog.get("bin/tool").is_some());
    }
}
