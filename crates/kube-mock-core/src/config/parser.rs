//! Configuration and fixture file parsing (YAML/JSON/JSONC).

use crate::config::error::ConfigError;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Format of a config or fixture file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    /// JSON with `//` and `/* */` comments
    Jsonc,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "json" => Some(ConfigFormat::Json),
            "jsonc" => Some(ConfigFormat::Jsonc),
            _ => None,
        }
    }

    pub fn parse<T: DeserializeOwned>(self, content: &str) -> Result<T, ConfigError> {
        let parsed: T = match self {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
            ConfigFormat::Jsonc => serde_json::from_str(&strip_json_comments(content))?,
        };
        Ok(parsed)
    }
}

/// Strip `//` and `/* */` comments from JSONC content, leaving string literals intact.
pub fn strip_json_comments(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            result.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                result.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' || next == '\r' {
                        result.push(next);
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => result.push(c),
        }
    }

    result
}

/// Read and parse a single file, choosing the format by extension.
pub fn read_config_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display = path.display().to_string();
    let format =
        ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnknownFileType(display.clone()))?;
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display,
        source,
    })?;
    format.parse(&content)
}

/// Expand a glob pattern into a sorted list of files.
///
/// A pattern without wildcards naming a missing file is an error rather than an
/// empty match.
pub fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = glob::glob(pattern).map_err(|e| ConfigError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ConfigError::Io {
            path: e.path().display().to_string(),
            source: std::io::Error::new(e.error().kind(), e.error().to_string()),
        })?;
        if path.is_file() {
            paths.push(path);
        }
    }

    let has_wildcard = pattern.contains(['*', '?', '[']);
    if paths.is_empty() && !has_wildcard {
        return Err(ConfigError::Io {
            path: pattern.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        });
    }

    paths.sort();
    Ok(paths)
}

/// Parse every file matched by `pattern`, each holding a list of entries, and
/// concatenate them in path order.
pub fn load_all<T: DeserializeOwned>(pattern: &str) -> Result<Vec<T>, ConfigError> {
    let mut all = Vec::new();
    for path in expand_pattern(pattern)? {
        let mut items: Vec<T> = read_config_file(&path)?;
        all.append(&mut items);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[rstest]
    #[case("fixtures/pods.yaml", Some(ConfigFormat::Yaml))]
    #[case("PODS.YML", Some(ConfigFormat::Yaml))]
    #[case("server.json", Some(ConfigFormat::Json))]
    #[case("server.jsonc", Some(ConfigFormat::Jsonc))]
    #[case("server.toml", None)]
    #[case("Makefile", None)]
    fn test_format_from_path(#[case] path: &str, #[case] expected: Option<ConfigFormat>) {
        assert_eq!(ConfigFormat::from_path(Path::new(path)), expected);
    }

    #[rstest]
    #[case("{\"key\": \"value\"}", "{\"key\": \"value\"}")]
    #[case("{\"key\": \"value\"} // comment", "{\"key\": \"value\"} ")]
    #[case("{\"key\": \"value\"} /* block */", "{\"key\": \"value\"} ")]
    #[case("{\"key\": 1} // c\n{\"k\": 2}", "{\"key\": 1} \n{\"k\": 2}")]
    #[case("{\"key\": \"a // b\"}", "{\"key\": \"a // b\"}")]
    #[case("{\"key\": \"q \\\" /* x */\"}", "{\"key\": \"q \\\" /* x */\"}")]
    #[case("/* multi\nline */{}", "{}")]
    fn test_strip_json_comments(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(strip_json_comments(input), expected);
    }

    #[rstest]
    #[case(ConfigFormat::Json, r#"{"crud": true, "namespace": "a"}"#)]
    #[case(ConfigFormat::Jsonc, "{\n  // CRUD server\n  \"crud\": true, /* ns */ \"namespace\": \"a\"\n}")]
    #[case(ConfigFormat::Yaml, "crud: true\nnamespace: a\n")]
    fn test_parse_each_format(#[case] format: ConfigFormat, #[case] content: &str) {
        let value: serde_json::Value = format.parse(content).unwrap();
        assert_eq!(value["crud"], true);
        assert_eq!(value["namespace"], "a");
    }

    #[rstest]
    fn test_parse_errors_keep_their_source() {
        let json: Result<serde_json::Value, _> = ConfigFormat::Json.parse("{crud");
        assert!(matches!(json.unwrap_err(), ConfigError::Json(_)));
        let yaml: Result<serde_json::Value, _> = ConfigFormat::Yaml.parse("crud: [");
        assert!(matches!(yaml.unwrap_err(), ConfigError::Yaml(_)));
    }

    #[rstest]
    fn test_load_all_concatenates_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = std::fs::File::create(dir.path().join("a.yaml")).unwrap();
        writeln!(first, "- 1\n- 2").unwrap();
        let mut second = std::fs::File::create(dir.path().join("b.json")).unwrap();
        writeln!(second, "[3]").unwrap();
        std::fs::File::create(dir.path().join("notes.txt")).unwrap();

        // glob has no brace expansion; `*.*` also hits notes.txt, so go per extension
        let mut values: Vec<u32> = load_all(&format!("{}/*.yaml", dir.path().display())).unwrap();
        values.extend(load_all::<u32>(&format!("{}/*.json", dir.path().display())).unwrap());
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[rstest]
    fn test_expand_pattern_missing_literal_file() {
        let result = expand_pattern("/definitely/not/here.yaml");
        assert!(matches!(result.unwrap_err(), ConfigError::Io { .. }));
    }

    #[rstest]
    fn test_expand_pattern_empty_wildcard_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let paths = expand_pattern(&format!("{}/*.yaml", dir.path().display())).unwrap();
        assert!(paths.is_empty());
    }

    #[rstest]
    fn test_read_config_file_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "crud = true").unwrap();
        let result: Result<serde_json::Value, _> = read_config_file(&path);
        assert!(matches!(result.unwrap_err(), ConfigError::UnknownFileType(_)));
    }
}
