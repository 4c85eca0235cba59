//! Resolution plans: the recorded construction graph of a container.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bumped whenever the on-disk layout changes.
pub const PLAN_VERSION: u32 = 1;

/// One definition and the keys it pulled in while being constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Definition label.
    pub key: String,
    /// Labels resolved by this definition's factory, sorted.
    pub dependencies: Vec<String>,
    /// Whether the definition is handed out behind a lazy proxy.
    pub lazy: bool,
}

/// A container's construction graph, suitable for caching.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    /// Layout version.
    pub version: u32,
    /// Digest over the registered definitions; see [`fingerprint`].
    pub fingerprint: String,
    /// Every definition, sorted by key.
    pub entries: Vec<PlanEntry>,
    /// Eager definitions in dependency-first construction order.
    pub order: Vec<String>,
}

impl ResolutionPlan {
    /// Build a plan from definition labels, lazy flags, and recorded edges.
    ///
    /// `definitions` maps each label to its lazy flag; `edges` maps a label
    /// to the labels its factory resolved.
    pub fn from_graph(
        definitions: &BTreeMap<String, bool>,
        edges: &BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        let entries = definitions
            .iter()
            .map(|(key, lazy)| PlanEntry {
                key: key.clone(),
                dependencies: edges
                    .get(key)
                    .map(|deps| deps.iter().cloned().collect())
                    .unwrap_or_default(),
                lazy: *lazy,
            })
            .collect();

        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        for (key, lazy) in definitions {
            if !lazy {
                visit(key, definitions, edges, &mut seen, &mut order);
            }
        }

        Self {
            version: PLAN_VERSION,
            fingerprint: fingerprint(definitions),
            entries,
            order,
        }
    }

    /// Whether this plan was derived from the same definitions.
    pub fn matches(&self, definitions: &BTreeMap<String, bool>) -> bool {
        self.version == PLAN_VERSION && self.fingerprint == fingerprint(definitions)
    }

    /// Labels of lazily proxied definitions.
    pub fn lazy_keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.lazy)
            .map(|e| e.key.clone())
            .collect()
    }
}

// Post-order DFS. Cycles never reach here: the resolver rejects them first.
fn visit(
    key: &str,
    definitions: &BTreeMap<String, bool>,
    edges: &BTreeMap<String, BTreeSet<String>>,
    seen: &mut BTreeSet<String>,
    order: &mut Vec<String>,
) {
    if !seen.insert(key.to_string()) {
        return;
    }
    if let Some(deps) = edges.get(key) {
        for dep in deps {
            if definitions.get(dep).is_some_and(|lazy| !lazy) {
                visit(dep, definitions, edges, seen, order);
            }
        }
    }
    order.push(key.to_string());
}

/// SHA-256 over sorted `label=lazy` lines, hex encoded.
pub fn fingerprint(definitions: &BTreeMap<String, bool>) -> String {
    let mut hasher = Sha256::new();
    for (key, lazy) in definitions {
        hasher.update(key.as_bytes());
        hasher.update(if *lazy { b"=lazy\n" as &[u8] } else { b"=eager\n" });
    }
    format!("{:x}", hasher.finalize())
}
