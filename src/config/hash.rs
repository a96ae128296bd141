//! Hashing for declared-state generations and idempotency keys.
//!
//! This module provides deterministic hashing of declarations so that two
//! loads of the same declared state share a generation, and so that each
//! remediation action carries a stable idempotency key.

use sha2::{Digest, Sha256};

use crate::declared::{Attributes, ResourceDeclaration};

use super::spec::EngineConfig;

/// Length of an idempotency key in hex characters.
const IDEMPOTENCY_KEY_LEN: usize = 16;

/// Hasher for computing configuration and state hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the generation hash of a set of declarations.
    ///
    /// Declarations are hashed in id order, so callers passing an unordered
    /// collection still get a deterministic result.
    #[must_use]
    pub fn hash_declarations<'a>(
        &self,
        declarations: impl IntoIterator<Item = &'a ResourceDeclaration>,
    ) -> String {
        let mut per_resource: Vec<(&str, String)> = declarations
            .into_iter()
            .map(|d| (d.id.as_str(), self.hash_declaration(d)))
            .collect();
        per_resource.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        for (_, hash) in per_resource {
            hasher.update(hash.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the hash of a single declaration.
    #[must_use]
    pub fn hash_declaration(&self, declaration: &ResourceDeclaration) -> String {
        let mut hasher = Sha256::new();

        hasher.update(declaration.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(declaration.resource_type.to_string().as_bytes());
        hasher.update([0u8]);
        if let Some(address) = &declaration.address {
            hasher.update(address.as_bytes());
        }
        hasher.update([0u8]);

        Self::update_attributes(&mut hasher, &declaration.attributes);

        hex::encode(hasher.finalize())
    }

    /// Feeds attributes into a hasher with explicit field separators.
    fn update_attributes(hasher: &mut Sha256, attributes: &Attributes) {
        match attributes.running {
            Some(true) => hasher.update(b"running=1;"),
            Some(false) => hasher.update(b"running=0;"),
            None => hasher.update(b"running=;"),
        }

        // Ports (sorted for determinism)
        hasher.update(b"ports=");
        if let Some(ports) = &attributes.ports {
            let mut sorted = ports.clone();
            sorted.sort_unstable();
            for port in sorted {
                hasher.update(port.to_be_bytes());
            }
        }
        hasher.update(b";");

        hasher.update(b"replicas=");
        if let Some(replicas) = attributes.replicas {
            hasher.update(replicas.to_be_bytes());
        }
        hasher.update(b";");

        for (name, value) in [
            ("image", &attributes.image),
            ("restart_policy", &attributes.restart_policy),
            ("driver", &attributes.driver),
            ("subnet", &attributes.subnet),
        ] {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            if let Some(value) = value {
                hasher.update(value.as_bytes());
            }
            hasher.update(b";");
        }
    }

    /// Computes the idempotency key of a remediation action.
    ///
    /// The key depends on the declared generation, the target, the action
    /// kind and the drifted fields it resolves (order-insensitive).
    #[must_use]
    pub fn idempotency_key(
        &self,
        generation: &str,
        resource_id: &str,
        action_kind: &str,
        fields: &[String],
    ) -> String {
        let mut sorted: Vec<&str> = fields.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = Sha256::new();
        hasher.update(generation.as_bytes());
        hasher.update([0u8]);
        hasher.update(resource_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(action_kind.as_bytes());
        for field in sorted {
            hasher.update([0u8]);
            hasher.update(field.as_bytes());
        }

        let mut key = hex::encode(hasher.finalize());
        key.truncate(IDEMPOTENCY_KEY_LEN);
        key
    }

    /// Computes a hash of the engine configuration, for reports.
    #[must_use]
    pub fn hash_config(&self, config: &EngineConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());
        hasher.update(config.state.path.as_bytes());

        // Serialized form covers the rest; serde_yaml output is stable for
        // our struct layout.
        match serde_yaml::to_string(config) {
            Ok(serialized) => hasher.update(serialized.as_bytes()),
            Err(_) => hasher.update(b"unserializable"),
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
