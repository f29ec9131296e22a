//! TOML parser for `bus.toml`.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Maximum number of segments in a tag path.
pub const MAX_SEGMENTS: usize = 8;

/// Parsed bus configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Dispatcher settings from the `[bus]` table.
    pub bus: BusSection,
    /// All tag entries, including auto-generated parents, sorted by path.
    entries: Vec<TagEntry>,
    redirects: Vec<RedirectEntry>,
}

/// The `[bus]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusSection {
    /// Deliver messages to listeners registered on ancestor topics.
    pub ancestor_matching: bool,
    /// Thread tag drained once per frame by the host.
    pub frame_thread: String,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            ancestor_matching: true,
            frame_thread: "main".to_string(),
        }
    }
}

/// A single tag entry with computed properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    /// Full dot-separated path (e.g., "Combat.Damage.Fire")
    pub path: String,
    /// Tree depth (0 = root)
    pub depth: u8,
    /// Parent path (None for root nodes)
    pub parent: Option<String>,
}

/// One `[[tags.redirects]]` item: a retired path and its replacement.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedirectEntry {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    bus: BusSection,
    #[serde(default)]
    tags: RawTags,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTags {
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    redirects: Vec<RedirectEntry>,
}

impl BusConfig {
    /// Parse from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        content.parse()
    }

    /// The `[bus]` section.
    pub fn settings(&self) -> &BusSection {
        &self.bus
    }

    /// Get all tag entries (parents first within each branch, sorted by path).
    pub fn entries(&self) -> impl Iterator<Item = &TagEntry> {
        self.entries.iter()
    }

    /// Get all redirects in declaration order.
    pub fn redirects(&self) -> &[RedirectEntry] {
        &self.redirects
    }

    /// Number of tag entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expand paths to include all parent nodes.
    ///
    /// e.g., "A.B.C" expands to ["A", "A.B", "A.B.C"]
    fn expand_paths(paths: &[String]) -> Result<Vec<TagEntry>, ConfigError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut entries: Vec<TagEntry> = Vec::new();

        for path in paths {
            let segments = validate_path(path)?;

            for depth in 0..segments.len() {
                let ancestor_path = segments[..=depth].join(".");
                if seen.insert(ancestor_path.clone()) {
                    let parent = (depth > 0).then(|| segments[..depth].join("."));
                    entries.push(TagEntry {
                        path: ancestor_path,
                        depth: depth as u8,
                        parent,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn check_redirects(
        redirects: &[RedirectEntry],
        entries: &[TagEntry],
    ) -> Result<(), ConfigError> {
        let declared: HashSet<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        let mut sources: HashSet<&str> = HashSet::new();

        for redirect in redirects {
            validate_path(&redirect.from)?;
            validate_path(&redirect.to)?;

            if redirect.from == redirect.to {
                return Err(ConfigError::Validation(format!(
                    "redirect '{}' points at itself",
                    redirect.from
                )));
            }
            if declared.contains(redirect.from.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "redirect source '{}' is also declared in [tags] paths",
                    redirect.from
                )));
            }
            if !sources.insert(redirect.from.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate redirect source '{}'",
                    redirect.from
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for BusConfig {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let raw: RawConfig = toml::from_str(content)?;

        if raw.bus.frame_thread.trim().is_empty() {
            return Err(ConfigError::Validation(
                "[bus] frame_thread must not be empty".into(),
            ));
        }

        let entries = Self::expand_paths(&raw.tags.paths)?;
        Self::check_redirects(&raw.tags.redirects, &entries)?;

        Ok(Self {
            bus: raw.bus,
            entries,
            redirects: raw.tags.redirects,
        })
    }
}

/// Check a dot-separated tag path and split it into segments.
///
/// Segments are non-empty and contain only alphanumerics, `_` and `-`.
pub fn validate_path(path: &str) -> Result<Vec<&str>, ConfigError> {
    if path.is_empty() {
        return Err(ConfigError::Validation("empty path not allowed".into()));
    }

    let segments: Vec<&str> = path.split('.').collect();
    if segments.len() > MAX_SEGMENTS {
        return Err(ConfigError::Validation(format!(
            "path '{}' has {} segments, at most {} are allowed",
            path,
            segments.len(),
            MAX_SEGMENTS
        )));
    }

    for seg in &segments {
        if seg.is_empty() {
            return Err(ConfigError::Validation(format!(
                "invalid path '{}': empty segment",
                path
            )));
        }
        if let Some(c) = seg
            .chars()
            .find(|c| !c.is_alphanumeric() && *c != '_' && *c != '-')
        {
            return Err(ConfigError::Validation(format!(
                "invalid path '{}': segment '{}' contains invalid character '{}'",
                path, seg, c
            )));
        }
    }
    Ok(segments)
}

/// Errors during config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<BusConfig, ConfigError> {
        toml.parse()
    }

    #[test]
    fn parse_simple_config() {
        let config = parse(
            r#"
[tags]
paths = [
    "Combat.Damage.Fire",
    "Combat.Damage.Ice",
    "Movement.Jump",
]
"#,
        )
        .unwrap();

        // Combat, Combat.Damage, Combat.Damage.Fire, Combat.Damage.Ice, Movement, Movement.Jump
        assert_eq!(config.len(), 6);

        let paths: Vec<_> = config.entries().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"Combat"));
        assert!(paths.contains(&"Combat.Damage"));
        assert!(paths.contains(&"Combat.Damage.Fire"));
        assert!(paths.contains(&"Movement.Jump"));
    }

    #[test]
    fn bus_section_defaults() {
        let config = parse("[tags]\npaths = [\"A\"]\n").unwrap();
        assert!(config.bus.ancestor_matching);
        assert_eq!(config.bus.frame_thread, "main");
    }

    #[test]
    fn bus_section_explicit() {
        let config = parse(
            r#"
[bus]
ancestor_matching = false
frame_thread = "render"
"#,
        )
        .unwrap();
        assert!(!config.bus.ancestor_matching);
        assert_eq!(config.bus.frame_thread, "render");
        assert!(config.is_empty());
    }

    #[test]
    fn rejects_empty_frame_thread() {
        let err = parse("[bus]\nframe_thread = \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = parse("[bus]\nancestor_matchin = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn expand_creates_parents() {
        let config = parse("[tags]\npaths = [\"A.B.C\"]\n").unwrap();

        let entries: Vec<_> = config.entries().collect();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].path, "A");
        assert_eq!(entries[0].depth, 0);
        assert_eq!(entries[0].parent, None);

        assert_eq!(entries[2].path, "A.B.C");
        assert_eq!(entries[2].depth, 2);
        assert_eq!(entries[2].parent.as_deref(), Some("A.B"));
    }

    #[test]
    fn deduplicates_parents() {
        let config = parse("[tags]\npaths = [\"A.B.C\", \"A.B.D\", \"A.X\"]\n").unwrap();
        assert_eq!(config.len(), 5);
    }

    #[test]
    fn rejects_invalid_paths() {
        let cases = [
            "",
            ".A",
            "A.",
            "A..B",
            "A.B C",
            "A.B/C",
            "L0.L1.L2.L3.L4.L5.L6.L7.L8",
        ];

        for case in cases {
            let toml = format!("[tags]\npaths = [\"{}\"]\n", case);
            assert!(parse(&toml).is_err(), "should reject: {:?}", case);
        }
    }

    #[test]
    fn accepts_hyphens_and_digits() {
        let toml = r#"
[tags]
paths = ["ui-events.click", "Level1.Stage-2", "_private"]
"#;
        assert!(parse(toml).is_ok());
    }

    #[test]
    fn parses_redirects() {
        let config = parse(
            r#"
[tags]
paths = ["Combat.Damage.Fire"]

[[tags.redirects]]
from = "Combat.Fire"
to = "Combat.Damage.Fire"
"#,
        )
        .unwrap();

        assert_eq!(
            config.redirects(),
            &[RedirectEntry {
                from: "Combat.Fire".into(),
                to: "Combat.Damage.Fire".into(),
            }]
        );
    }

    #[test]
    fn rejects_self_redirect() {
        let err = parse(
            r#"
[[tags.redirects]]
from = "A"
to = "A"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("itself"));
    }

    #[test]
    fn rejects_redirect_from_declared_path() {
        let err = parse(
            r#"
[tags]
paths = ["A.B", "C"]

[[tags.redirects]]
from = "A"
to = "C"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("also declared"));
    }

    #[test]
    fn rejects_duplicate_redirect_source() {
        let err = parse(
            r#"
[[tags.redirects]]
from = "Old"
to = "A"

[[tags.redirects]]
from = "Old"
to = "B"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
