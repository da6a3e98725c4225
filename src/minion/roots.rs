// ABOUTME: Environment-bucketed file/pillar root bookkeeping and wildcard handling

use std::path::{Path, PathBuf};

/// Environment token meaning "applies to every environment". Roots
/// registered under it appear in the minion document so the minion's own
/// environment resolution can see them, but they never become bind
/// mounts: without a concrete environment there is no fixed container
/// directory to mount onto.
pub const WILDCARD_ENV: &str = "__env__";

/// A host directory paired with the in-container path it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootEntry {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
}

impl RootEntry {
    /// True when either side still carries the wildcard token literally.
    pub fn contains_wildcard(&self) -> bool {
        path_contains(&self.host_path, WILDCARD_ENV)
            || path_contains(&self.container_path, WILDCARD_ENV)
    }
}

fn path_contains(path: &Path, token: &str) -> bool {
    path.to_string_lossy().contains(token)
}

/// Resolve a caller-supplied target suffix to its in-container path.
/// Concrete environments get an environment segment under the base
/// directory; wildcard roots sit directly under the base since there is
/// no concrete directory to place them in yet.
pub fn resolve_container_path(base: &Path, environ: &str, target: &Path) -> PathBuf {
    if environ == WILDCARD_ENV {
        base.join(target)
    } else {
        base.join(environ).join(target)
    }
}

/// Environment -> roots mapping preserving insertion order of both the
/// environments and the entries within each bucket. Salt applies roots
/// in priority order, so a hash map would scramble the document.
#[derive(Debug, Clone, Default)]
pub struct EnvRoots {
    buckets: Vec<(String, Vec<RootEntry>)>,
}

impl EnvRoots {
    pub fn push(&mut self, environ: &str, entry: RootEntry) {
        if let Some((_, bucket)) = self.buckets.iter_mut().find(|(e, _)| e == environ) {
            bucket.push(entry);
        } else {
            self.buckets.push((environ.to_string(), vec![entry]));
        }
    }

    pub fn get(&self, environ: &str) -> Option<&[RootEntry]> {
        self.buckets.iter().find(|(e, _)| e == environ).map(|(_, b)| b.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[RootEntry])> {
        self.buckets.iter().map(|(e, b)| (e.as_str(), b.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// The (host, container) pairs that should become bind mounts.
    /// Wildcard buckets are skipped, as is any entry whose paths still
    /// carry the wildcard token.
    pub fn mounts(&self) -> Vec<(PathBuf, PathBuf)> {
        self.iter()
            .filter(|(environ, _)| *environ != WILDCARD_ENV)
            .flat_map(|(_, entries)| entries.iter())
            .filter(|entry| !entry.contains_wildcard())
            .map(|entry| (entry.host_path.clone(), entry.container_path.clone()))
            .collect()
    }

    /// The root lists as they appear in the minion document: environment
    /// -> ordered container path strings, wildcard bucket included.
    pub fn to_yaml(&self) -> serde_yaml::Value {
        let mut map = serde_yaml::Mapping::new();
        for (environ, entries) in self.iter() {
            let paths: Vec<serde_yaml::Value> = entries
                .iter()
                .map(|e| serde_yaml::Value::String(e.container_path.to_string_lossy().into_owned()))
                .collect();
            map.insert(environ.into(), serde_yaml::Value::Sequence(paths));
        }
        serde_yaml::Value::Mapping(map)
    }
}
