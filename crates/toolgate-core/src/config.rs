//! Rule-set file loading.
//!
//! The format is chosen by extension: `.json` or `.toml`.

use std::path::Path;

use serde_json::Value;

use crate::domain::error::ConfigurationError;
use crate::domain::rule::RuleSet;

/// Load and parse a rule-set document from disk.
///
/// The rule set is only parsed here; compile it with
/// [`Evaluator::new`](crate::runner::Evaluator::new) to validate graders
/// and extractors.
pub fn load_rule_set(path: &Path) -> Result<RuleSet, ConfigurationError> {
    let load_err = |detail: String| ConfigurationError::Load {
        path: path.display().to_string(),
        detail,
    };

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let text = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;

    let value: Value = match extension.as_str() {
        "json" => serde_json::from_str(&text).map_err(|e| load_err(e.to_string()))?,
        "toml" => toml::from_str(&text).map_err(|e| load_err(e.to_string()))?,
        other => {
            return Err(load_err(format!(
                "unsupported rule-set extension '{other}' (expected .json or .toml)"
            )))
        }
    };

    RuleSet::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_json_rule_set() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"name": "db", "version": "2", "rules": [
                {"name": "flow", "grader": "sequence_conformance",
                 "params": {"expected": ["search_tables", "query_database"]}}
            ]}"#,
        )
        .expect("write");

        let set = load_rule_set(&path).expect("load");
        assert_eq!(set.name, "db");
        assert_eq!(set.rules[0].grader, "sequence_conformance");
    }

    #[test]
    fn test_load_toml_rule_set() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
name = "db"
version = "1"

[comparison]
min_samples = 20

[[rules]]
name = "tables_discovered"
grader = "containment"
direction = "higher_is_better"

[rules.extractors.allow_list]
name = "provenance"
params = { tools = ["search_tables"], path = "tables" }

[rules.params]
target_tools = ["query_database"]
reference = { source = "query", argument = "sql" }
"#,
        )
        .expect("write");

        let set = load_rule_set(&path).expect("load");
        assert_eq!(set.comparison.min_samples, 20);
        assert_eq!(set.comparison.weak_alpha, 0.05);
        assert_eq!(set.rules[0].extractors["allow_list"].name, "provenance");
        assert_eq!(set.rules[0].params["reference"]["argument"], "sql");
    }

    #[test]
    fn test_unknown_extension_is_configuration_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("rules.yaml");
        std::fs::write(&path, "rules: []").expect("write");
        assert!(matches!(
            load_rule_set(&path),
            Err(ConfigurationError::Load { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = load_rule_set(Path::new("/nonexistent/rules.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rules.json"));
    }
}
