//! Tool, resource, and prompt registries, plus the capability registry.
//!
//! One [`Registry`] instance serves each kind; entries are keyed by
//! public name (or public URI) with a reverse index by owning upstream
//! for bulk removal. Mutations are transactional: a collision anywhere
//! in a batch inserts nothing. Every mutation bumps the revision; the
//! canonical digest is recomputed on demand from the sorted entry set,
//! so it depends only on the multiset of descriptors.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use hatago_core::error::{HubResult, RoutingError};
use hatago_core::messages::Capabilities;

/// One registered entry.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    /// The upstream that owns the entry
    pub upstream_id: String,
    /// Name (or URI) as the upstream declared it
    pub original_name: String,
    /// Hub-facing name (or URI)
    pub public_name: String,
    /// The descriptor as served downstream: the opaque upstream payload
    /// with its name/uri field rewritten to the public form
    pub descriptor: Value,
}

/// Input row for [`Registry::register_all`].
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Name (or URI) as the upstream declared it
    pub original_name: String,
    /// Hub-facing name (or URI)
    pub public_name: String,
    /// Descriptor already rewritten to the public form
    pub descriptor: Value,
}

/// A keyed descriptor table for one kind (tools, resources, or prompts).
pub struct Registry {
    label: &'static str,
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    by_public: HashMap<String, Arc<EntryMetadata>>,
    by_upstream: HashMap<String, HashSet<String>>,
    revision: u64,
}

impl Registry {
    /// Create an empty registry; `label` names the kind in logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Atomically insert a batch for one upstream.
    ///
    /// Rejects with `DuplicatePublic` if any public name collides with an
    /// existing entry or with another row in the batch; nothing is
    /// inserted on failure. An empty batch is a no-op that does not bump
    /// the revision.
    pub fn register_all(&self, upstream_id: &str, entries: Vec<RegistryEntry>) -> HubResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write().unwrap();

        let mut batch: HashSet<&str> = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if inner.by_public.contains_key(&entry.public_name)
                || !batch.insert(entry.public_name.as_str())
            {
                return Err(RoutingError::DuplicatePublic {
                    name: entry.public_name.clone(),
                }
                .into());
            }
        }

        let owned = inner
            .by_upstream
            .entry(upstream_id.to_string())
            .or_default();
        let mut names: Vec<String> = Vec::with_capacity(entries.len());
        for entry in &entries {
            owned.insert(entry.public_name.clone());
            names.push(entry.public_name.clone());
        }
        for entry in entries {
            let public_name = entry.public_name.clone();
            inner.by_public.insert(
                public_name,
                Arc::new(EntryMetadata {
                    upstream_id: upstream_id.to_string(),
                    original_name: entry.original_name,
                    public_name: entry.public_name,
                    descriptor: entry.descriptor,
                }),
            );
        }
        inner.revision += 1;

        tracing::debug!(
            upstream = %upstream_id,
            kind = self.label,
            count = names.len(),
            revision = inner.revision,
            "registered entries"
        );
        Ok(())
    }

    /// Atomically remove every entry owned by `upstream_id`.
    ///
    /// Returns how many entries were removed; a no-op (zero) does not
    /// bump the revision.
    pub fn remove_all(&self, upstream_id: &str) -> usize {
        let mut inner = self.inner.write().unwrap();
        let Some(names) = inner.by_upstream.remove(upstream_id) else {
            return 0;
        };
        if names.is_empty() {
            return 0;
        }
        for name in &names {
            inner.by_public.remove(name);
        }
        inner.revision += 1;
        tracing::debug!(
            upstream = %upstream_id,
            kind = self.label,
            count = names.len(),
            revision = inner.revision,
            "removed entries"
        );
        names.len()
    }

    /// Look up an entry by public name.
    pub fn resolve(&self, public_name: &str) -> Option<Arc<EntryMetadata>> {
        self.inner
            .read()
            .unwrap()
            .by_public
            .get(public_name)
            .cloned()
    }

    /// Look up an entry by `(upstream_id, original_name)`.
    pub fn resolve_original(
        &self,
        upstream_id: &str,
        original_name: &str,
    ) -> Option<Arc<EntryMetadata>> {
        let inner = self.inner.read().unwrap();
        let names = inner.by_upstream.get(upstream_id)?;
        names
            .iter()
            .filter_map(|name| inner.by_public.get(name))
            .find(|meta| meta.original_name == original_name)
            .cloned()
    }

    /// Snapshot of entries, optionally restricted to one upstream.
    pub fn list(&self, upstream_id: Option<&str>) -> Vec<Arc<EntryMetadata>> {
        let inner = self.inner.read().unwrap();
        inner
            .by_public
            .values()
            .filter(|meta| upstream_id.map_or(true, |id| meta.upstream_id == id))
            .cloned()
            .collect()
    }

    /// Snapshot of public-form descriptors, sorted by public name.
    pub fn descriptors(&self) -> Vec<Value> {
        let inner = self.inner.read().unwrap();
        let mut entries: Vec<&Arc<EntryMetadata>> = inner.by_public.values().collect();
        entries.sort_by(|a, b| a.public_name.cmp(&b.public_name));
        entries.iter().map(|meta| meta.descriptor.clone()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_public.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotonically increasing mutation counter.
    pub fn revision(&self) -> u64 {
        self.inner.read().unwrap().revision
    }

    /// Canonical digest: SHA-256 over
    /// `[public_name, original_name, upstream_id, sha256(descriptor)]`
    /// tuples sorted by public name, hex-encoded.
    pub fn hash(&self) -> String {
        let inner = self.inner.read().unwrap();
        let mut entries: Vec<&Arc<EntryMetadata>> = inner.by_public.values().collect();
        entries.sort_by(|a, b| a.public_name.cmp(&b.public_name));

        let mut hasher = Sha256::new();
        for meta in entries {
            let descriptor_bytes = serde_json::to_vec(&meta.descriptor).unwrap_or_default();
            let descriptor_digest = hex_digest(&Sha256::digest(&descriptor_bytes));
            hasher.update(meta.public_name.as_bytes());
            hasher.update([0]);
            hasher.update(meta.original_name.as_bytes());
            hasher.update([0]);
            hasher.update(meta.upstream_id.as_bytes());
            hasher.update([0]);
            hasher.update(descriptor_digest.as_bytes());
            hasher.update([0]);
        }
        hex_digest(&hasher.finalize())
    }

    /// Current `(revision, hash)` pair for list_changed payloads.
    pub fn version(&self) -> (u64, String) {
        (self.revision(), self.hash())
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Whether one upstream supports one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilitySupport {
    /// The upstream declared the backing capability
    Supported,
    /// The upstream's declared capabilities exclude it
    Unsupported,
    /// Not yet determined
    Unknown,
}

/// Tracks per-upstream method support and per-session client
/// capabilities.
#[derive(Default)]
pub struct CapabilityRegistry {
    methods: RwLock<HashMap<(String, String), CapabilitySupport>>,
    sessions: RwLock<HashMap<String, Capabilities>>,
}

impl CapabilityRegistry {
    /// Create an empty capability registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record whether `upstream_id` supports `method`.
    pub fn set_method(&self, upstream_id: &str, method: &str, support: CapabilitySupport) {
        self.methods
            .write()
            .unwrap()
            .insert((upstream_id.to_string(), method.to_string()), support);
    }

    /// What is known about `upstream_id` supporting `method`.
    pub fn method(&self, upstream_id: &str, method: &str) -> CapabilitySupport {
        self.methods
            .read()
            .unwrap()
            .get(&(upstream_id.to_string(), method.to_string()))
            .copied()
            .unwrap_or(CapabilitySupport::Unknown)
    }

    /// Drop everything recorded for one upstream.
    pub fn remove_upstream(&self, upstream_id: &str) {
        self.methods
            .write()
            .unwrap()
            .retain(|(id, _), _| id != upstream_id);
    }

    /// Store a session's client capabilities.
    pub fn set_session(&self, session_id: &str, capabilities: Capabilities) {
        self.sessions
            .write()
            .unwrap()
            .insert(session_id.to_string(), capabilities);
    }

    /// A session's client capabilities, when known.
    pub fn session(&self, session_id: &str) -> Option<Capabilities> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    /// Drop a session's capabilities.
    pub fn remove_session(&self, session_id: &str) {
        self.sessions.write().unwrap().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(original: &str, public: &str) -> RegistryEntry {
        RegistryEntry {
            original_name: original.to_string(),
            public_name: public.to_string(),
            descriptor: json!({ "name": public, "description": format!("{original} tool") }),
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = Registry::new("tool");
        registry
            .register_all("s1", vec![entry("echo", "s1_echo"), entry("add", "s1_add")])
            .unwrap();

        let meta = registry.resolve("s1_echo").unwrap();
        assert_eq!(meta.upstream_id, "s1");
        assert_eq!(meta.original_name, "echo");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.revision(), 1);

        let by_original = registry.resolve_original("s1", "add").unwrap();
        assert_eq!(by_original.public_name, "s1_add");
    }

    #[test]
    fn test_collision_inserts_nothing() {
        let registry = Registry::new("tool");
        registry.register_all("a", vec![entry("foo", "foo")]).unwrap();
        let revision = registry.revision();

        let err = registry
            .register_all("b", vec![entry("bar", "bar"), entry("foo", "foo")])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate public name 'foo'"));

        // Atomic: the non-colliding row was not inserted either.
        assert!(registry.resolve("bar").is_none());
        assert_eq!(registry.revision(), revision);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_collision_within_batch() {
        let registry = Registry::new("tool");
        let err = registry
            .register_all("a", vec![entry("x", "dup"), entry("y", "dup")])
            .unwrap_err();
        assert!(err.to_string().contains("dup"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_all_is_atomic_and_bumps_once() {
        let registry = Registry::new("tool");
        registry
            .register_all("s1", vec![entry("a", "s1_a"), entry("b", "s1_b")])
            .unwrap();
        registry.register_all("s2", vec![entry("c", "s2_c")]).unwrap();

        let revision = registry.revision();
        assert_eq!(registry.remove_all("s1"), 2);
        assert_eq!(registry.revision(), revision + 1);
        assert!(registry.resolve("s1_a").is_none());
        assert!(registry.resolve("s2_c").is_some());

        // No-op removal does not bump the revision.
        assert_eq!(registry.remove_all("s1"), 0);
        assert_eq!(registry.revision(), revision + 1);
    }

    #[test]
    fn test_revision_never_decreases() {
        let registry = Registry::new("tool");
        let mut last = registry.revision();
        for round in 0..5 {
            registry
                .register_all(&format!("s{round}"), vec![entry("t", &format!("s{round}_t"))])
                .unwrap();
            assert!(registry.revision() > last);
            last = registry.revision();
        }
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = Registry::new("tool");
        a.register_all("s1", vec![entry("x", "s1_x")]).unwrap();
        a.register_all("s2", vec![entry("y", "s2_y")]).unwrap();

        let b = Registry::new("tool");
        b.register_all("s2", vec![entry("y", "s2_y")]).unwrap();
        b.register_all("s1", vec![entry("x", "s1_x")]).unwrap();

        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), Registry::new("tool").hash());
    }

    #[test]
    fn test_hash_tracks_content() {
        let registry = Registry::new("tool");
        registry.register_all("s1", vec![entry("x", "s1_x")]).unwrap();
        let before = registry.hash();

        registry.register_all("s2", vec![entry("y", "s2_y")]).unwrap();
        assert_ne!(registry.hash(), before);

        registry.remove_all("s2");
        assert_eq!(registry.hash(), before);
    }

    #[test]
    fn test_descriptors_sorted_by_public_name() {
        let registry = Registry::new("tool");
        registry
            .register_all("s1", vec![entry("b", "s1_b"), entry("a", "s1_a")])
            .unwrap();
        let descriptors = registry.descriptors();
        assert_eq!(descriptors[0]["name"], "s1_a");
        assert_eq!(descriptors[1]["name"], "s1_b");
    }

    #[test]
    fn test_capability_registry() {
        let caps = CapabilityRegistry::new();
        assert_eq!(caps.method("s1", "tools/call"), CapabilitySupport::Unknown);

        caps.set_method("s1", "tools/call", CapabilitySupport::Supported);
        caps.set_method("s1", "prompts/get", CapabilitySupport::Unsupported);
        assert_eq!(caps.method("s1", "tools/call"), CapabilitySupport::Supported);

        caps.remove_upstream("s1");
        assert_eq!(caps.method("s1", "tools/call"), CapabilitySupport::Unknown);
    }
}
