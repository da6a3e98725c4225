// ABOUTME: Typed minion configuration document and its YAML composition rules

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Log levels the minion accepts for `log_level` and `log_level_logfile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Garbage,
    Trace,
    #[default]
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Garbage => "garbage",
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

/// Builder-accumulated fields that land in the minion document. Optional
/// fields left unset are dropped from the rendered YAML so the minion
/// falls back to its own defaults for them.
#[derive(Debug, Clone)]
pub struct MinionConfig {
    pub id: Option<String>,
    pub saltenv: Option<String>,
    pub state_top: Option<String>,
    pub state_top_saltenv: Option<String>,
    pub file_server_backends: Vec<String>,
    pub gitfs_remotes: Vec<String>,
    pub state_verbose: bool,
    pub log_level: LogLevel,
    pub log_level_logfile: LogLevel,
}

impl Default for MinionConfig {
    fn default() -> Self {
        Self {
            id: None,
            saltenv: None,
            state_top: None,
            state_top_saltenv: None,
            file_server_backends: Vec::new(),
            gitfs_remotes: Vec::new(),
            state_verbose: false,
            log_level: LogLevel::Debug,
            log_level_logfile: LogLevel::Debug,
        }
    }
}

impl MinionConfig {
    /// Compose the final document: write the builder fields over `base`
    /// (a mapping loaded from an external config file, or empty), then
    /// overlay `extra` key-by-key with extra winning on conflicts.
    /// Null-valued keys from any layer are stripped at the end.
    pub fn compose(
        &self,
        base: &Mapping,
        file_roots: Value,
        pillar_roots: Value,
        extra: &Mapping,
    ) -> Mapping {
        let mut doc = base.clone();

        set_or_remove(&mut doc, "id", self.id.as_deref().map(Value::from));
        set_or_remove(&mut doc, "saltenv", self.saltenv.as_deref().map(Value::from));
        set_or_remove(&mut doc, "state_top", self.state_top.as_deref().map(Value::from));
        set_or_remove(
            &mut doc,
            "state_top_saltenv",
            self.state_top_saltenv.as_deref().map(Value::from),
        );
        doc.insert("file_roots".into(), file_roots);
        doc.insert("pillar_roots".into(), pillar_roots);
        doc.insert(
            "file_server_backends".into(),
            string_sequence(&self.file_server_backends),
        );
        doc.insert("gitfs_remotes".into(), string_sequence(&self.gitfs_remotes));
        doc.insert("state_verbose".into(), Value::Bool(self.state_verbose));
        doc.insert("log_level".into(), Value::from(self.log_level.as_str()));
        doc.insert(
            "log_level_logfile".into(),
            Value::from(self.log_level_logfile.as_str()),
        );

        for (key, value) in extra {
            doc.insert(key.clone(), value.clone());
        }

        doc.into_iter().filter(|(_, value)| !value.is_null()).collect()
    }
}

fn set_or_remove(doc: &mut Mapping, key: &str, value: Option<Value>) {
    match value {
        Some(value) => {
            doc.insert(key.into(), value);
        }
        None => {
            doc.remove(&Value::from(key));
        }
    }
}

fn string_sequence(items: &[String]) -> Value {
    Value::Sequence(items.iter().map(|s| Value::from(s.as_str())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn get<'a>(doc: &'a Mapping, key: &str) -> Option<&'a Value> {
        doc.get(&Value::from(key))
    }

    #[test]
    fn test_log_level_serializes_lowercase() {
        let rendered = serde_yaml::to_string(&LogLevel::Warning).unwrap();
        assert_eq!(rendered.trim(), "warning");
        assert_eq!(LogLevel::default(), LogLevel::Debug);
    }

    #[test]
    fn test_compose_omits_unset_keys() {
        let config = MinionConfig::default();
        let doc = config.compose(
            &Mapping::new(),
            Value::Mapping(Mapping::new()),
            Value::Mapping(Mapping::new()),
            &Mapping::new(),
        );

        assert!(get(&doc, "id").is_none());
        assert!(get(&doc, "saltenv").is_none());
        assert!(get(&doc, "state_top").is_none());
        assert_eq!(get(&doc, "state_verbose"), Some(&Value::Bool(false)));
        assert_eq!(get(&doc, "log_level"), Some(&Value::from("debug")));
    }

    #[test]
    fn test_compose_extra_config_wins_on_conflict() {
        let config = MinionConfig {
            id: Some("node1".to_string()),
            ..Default::default()
        };

        let mut extra = Mapping::new();
        extra.insert("id".into(), Value::from("override"));
        extra.insert("hash_type".into(), Value::from("sha256"));

        let doc = config.compose(
            &Mapping::new(),
            Value::Mapping(Mapping::new()),
            Value::Mapping(Mapping::new()),
            &extra,
        );

        assert_eq!(get(&doc, "id"), Some(&Value::from("override")));
        assert_eq!(get(&doc, "hash_type"), Some(&Value::from("sha256")));
        // Untouched base keys survive the overlay
        assert_eq!(get(&doc, "log_level"), Some(&Value::from("debug")));
    }

    #[test]
    fn test_compose_null_extra_key_is_stripped() {
        let config = MinionConfig::default();
        let mut extra = Mapping::new();
        extra.insert("master".into(), Value::Null);

        let doc = config.compose(
            &Mapping::new(),
            Value::Mapping(Mapping::new()),
            Value::Mapping(Mapping::new()),
            &extra,
        );

        assert!(get(&doc, "master").is_none());
    }

    #[test]
    fn test_compose_builder_fields_replace_loaded_base() {
        let mut base = Mapping::new();
        base.insert("id".into(), Value::from("from-file"));
        base.insert("hash_type".into(), Value::from("md5"));

        let config = MinionConfig {
            id: Some("node1".to_string()),
            ..Default::default()
        };

        let doc = config.compose(
            &base,
            Value::Mapping(Mapping::new()),
            Value::Mapping(Mapping::new()),
            &Mapping::new(),
        );

        // Builder field overwrites the loaded value, unrelated keys stay
        assert_eq!(get(&doc, "id"), Some(&Value::from("node1")));
        assert_eq!(get(&doc, "hash_type"), Some(&Value::from("md5")));
    }

    #[test]
    fn test_compose_unset_builder_field_clears_loaded_key() {
        let mut base = Mapping::new();
        base.insert("saltenv".into(), Value::from("from-file"));

        let config = MinionConfig::default();
        let doc = config.compose(
            &base,
            Value::Mapping(Mapping::new()),
            Value::Mapping(Mapping::new()),
            &Mapping::new(),
        );

        // The builder owns the fixed keys: unset means absent, even when
        // the loaded file carried a value
        assert!(get(&doc, "saltenv").is_none());
    }
}
