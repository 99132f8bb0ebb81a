//! Crush specs: which directories are crushed, into what, and how named
//!
//! A spec pairs a directory regex with an output name template and the
//! input/output format identifiers. Specs are tried in order and the first
//! whose regex matches the whole directory path wins.
//!
//! Templates may contain:
//! - `${crush.task.num}`  the partition processing the bucket
//! - `${crush.timestamp}` the run timestamp
//! - `${crush.file.num}`  the bucket's position within its partition
//! - `$1`, `${name}`      capture groups of the directory match

use crate::error::ConfigError;
use crate::format::FormatAdapter;
use regex::Regex;
use std::borrow::Cow;
use std::path::Path;
use std::sync::LazyLock;

pub const TASK_NUM: &str = "crush.task.num";
pub const TIMESTAMP: &str = "crush.timestamp";
pub const FILE_NUM: &str = "crush.file.num";

/// Placeholder references such as `${crush.timestamp}`
static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z][a-zA-Z.]*)\}").expect("Invalid placeholder regex")
});

/// Capture group references: `$$`, `${key}`, `$1`, `$name`
static CAPTURE_REF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\$|\{([^}]*)\}|([0-9A-Za-z_]+))").expect("Invalid capture reference regex")
});

/// Compile a regex that must match the entire input
pub fn full_match_regex(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Values substituted into an output name template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    pub task_num: usize,
    pub timestamp: String,
    pub file_num: u64,
}

impl Placeholders {
    fn value(&self, key: &str) -> Option<String> {
        match key {
            TASK_NUM => Some(self.task_num.to_string()),
            TIMESTAMP => Some(self.timestamp.clone()),
            FILE_NUM => Some(self.file_num.to_string()),
            _ => None,
        }
    }
}

/// One (directory regex, template, input format, output format) rule
#[derive(Debug, Clone)]
pub struct CrushSpec {
    pattern: String,
    matcher: Regex,
    template: String,
    pub input: FormatAdapter,
    pub output: FormatAdapter,
}

impl CrushSpec {
    /// Build a spec, rejecting unknown placeholders and cross-family formats
    pub fn new(
        pattern: &str,
        template: &str,
        input: FormatAdapter,
        output: FormatAdapter,
    ) -> Result<Self, ConfigError> {
        let matcher = full_match_regex(pattern)?;
        FormatAdapter::check_pair(input, output)?;

        let groups: Vec<&str> = matcher.capture_names().flatten().collect();
        for caps in PLACEHOLDER_REGEX.captures_iter(template) {
            let key = &caps[1];
            let known = matches!(key, TASK_NUM | TIMESTAMP | FILE_NUM) || groups.contains(&key);
            if !known {
                return Err(ConfigError::UnresolvedPlaceholder {
                    template: template.to_string(),
                    key: key.to_string(),
                });
            }
        }
        if let Some(key) = unresolved_group(&matcher, template) {
            return Err(ConfigError::UnresolvedPlaceholder {
                template: template.to_string(),
                key,
            });
        }

        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
            template: template.to_string(),
            input,
            output,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn matches(&self, dir: &Path) -> bool {
        self.matcher.is_match(&dir.to_string_lossy())
    }

    /// Resolve the output file name for a bucket of `dir`
    ///
    /// Returns `None` when `dir` does not match this spec.
    pub fn output_name(&self, dir: &Path, values: &Placeholders) -> Option<String> {
        let dir = dir.to_string_lossy();
        let caps = self.matcher.captures(&dir)?;

        let substituted: Cow<'_, str> =
            PLACEHOLDER_REGEX.replace_all(&self.template, |c: &regex::Captures<'_>| {
                values.value(&c[1]).unwrap_or_else(|| c[0].to_string())
            });

        let mut name = String::new();
        caps.expand(&substituted, &mut name);
        Some(name)
    }
}

/// First capture reference in `template` that `matcher` cannot fill
///
/// Dotted keys are crush placeholders and are checked separately.
fn unresolved_group(matcher: &Regex, template: &str) -> Option<String> {
    CAPTURE_REF_REGEX.captures_iter(template).find_map(|caps| {
        let key = caps.get(1).or_else(|| caps.get(2))?.as_str();
        if key.is_empty() || key.contains('.') {
            return None;
        }
        let resolved = match key.parse::<usize>() {
            Ok(index) => index < matcher.captures_len(),
            Err(_) => matcher.capture_names().flatten().any(|name| name == key),
        };
        (!resolved).then(|| key.to_string())
    })
}

/// Ordered list of specs; first match wins
#[derive(Debug, Clone, Default)]
pub struct CrushSpecs {
    specs: Vec<CrushSpec>,
}

impl CrushSpecs {
    pub fn new(specs: Vec<CrushSpec>) -> Self {
        Self { specs }
    }

    /// First spec matching `dir`, with its position in the list
    pub fn find(&self, dir: &Path) -> Option<(usize, &CrushSpec)> {
        self.specs.iter().enumerate().find(|(_, spec)| spec.matches(dir))
    }

    pub fn get(&self, index: usize) -> Option<&CrushSpec> {
        self.specs.get(index)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CrushSpec> {
        self.specs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> Placeholders {
        Placeholders {
            task_num: 7,
            timestamp: "20240102030405".to_string(),
            file_num: 3,
        }
    }

    #[test]
    fn test_default_template() {
        let spec = CrushSpec::new(
            ".+",
            "crushed_file-${crush.timestamp}-${crush.task.num}-${crush.file.num}",
            FormatAdapter::Sequence,
            FormatAdapter::Sequence,
        )
        .unwrap();

        let name = spec.output_name(Path::new("/data/in/a"), &values()).unwrap();
        assert_eq!(name, "crushed_file-20240102030405-7-3");
    }

    #[test]
    fn test_capture_groups_expand() {
        let spec = CrushSpec::new(
            r"/data/(?<kind>\w+)/(\d+)",
            "${kind}-$2-${crush.file.num}",
            FormatAdapter::Text,
            FormatAdapter::Text,
        )
        .unwrap();

        let name = spec.output_name(Path::new("/data/logs/2024"), &values()).unwrap();
        assert_eq!(name, "logs-2024-3");
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let err = CrushSpec::new(
            ".+",
            "out-${crush.host}",
            FormatAdapter::Text,
            FormatAdapter::Text,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedPlaceholder { key, .. } if key == "crush.host"));
    }

    #[test]
    fn test_missing_capture_group_rejected() {
        let err = CrushSpec::new(
            r"/data/(\w+)",
            "out-$2",
            FormatAdapter::Text,
            FormatAdapter::Text,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedPlaceholder { key, .. } if key == "2"));

        let err = CrushSpec::new(
            r"/data/(\w+)",
            "out-$kind",
            FormatAdapter::Text,
            FormatAdapter::Text,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedPlaceholder { key, .. } if key == "kind"));

        let err = CrushSpec::new(".+", "out-${3}", FormatAdapter::Text, FormatAdapter::Text)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedPlaceholder { key, .. } if key == "3"));
    }

    #[test]
    fn test_known_capture_groups_accepted() {
        for template in ["$1-$$", "${1}-${crush.timestamp}", "$kind-$1", "${kind}"] {
            assert!(
                CrushSpec::new(
                    r"/data/(?<kind>\w+)",
                    template,
                    FormatAdapter::Text,
                    FormatAdapter::Text
                )
                .is_ok(),
                "{}",
                template
            );
        }
    }

    #[test]
    fn test_regex_must_match_whole_path() {
        let spec = CrushSpec::new("/data/a", "x", FormatAdapter::Text, FormatAdapter::Text).unwrap();
        assert!(spec.matches(Path::new("/data/a")));
        assert!(!spec.matches(Path::new("/data/ab")));
        assert!(spec.output_name(Path::new("/data/a/b"), &values()).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let specs = CrushSpecs::new(vec![
            CrushSpec::new("/data/special/.*", "s", FormatAdapter::Text, FormatAdapter::Text)
                .unwrap(),
            CrushSpec::new(".+", "g", FormatAdapter::Text, FormatAdapter::Text).unwrap(),
        ]);

        let (idx, spec) = specs.find(Path::new("/data/special/x")).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(spec.template(), "s");

        let (idx, _) = specs.find(Path::new("/data/other")).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_no_match_is_none() {
        let specs = CrushSpecs::new(vec![CrushSpec::new(
            "/only/here",
            "x",
            FormatAdapter::Text,
            FormatAdapter::Text,
        )
        .unwrap()]);
        assert!(specs.find(Path::new("/elsewhere")).is_none());
    }

    #[test]
    fn test_cross_family_spec_rejected() {
        let err = CrushSpec::new(".+", "x", FormatAdapter::Sequence, FormatAdapter::Ipc).unwrap_err();
        assert!(matches!(err, ConfigError::IncompatibleFormats { .. }));
    }
}
