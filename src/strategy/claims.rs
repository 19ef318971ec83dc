// src/strategy/claims.rs

use crate::config::ClaimMappings;
use crate::error::MappingError;
use std::collections::HashMap;

/// A token's claim set.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Rewrites claims before they are embedded in an issued token.
pub trait ClaimMappingStrategy: Send + Sync {
    /// Returns a new claim set. The input is left untouched.
    fn map_claims(&self, claims: &Claims) -> Result<Claims, MappingError>;
}

/// What happens to a source claim once its value was copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourcePolicy {
    /// The source claim is removed from the output.
    #[default]
    Rename,
    /// The source claim stays in the output next to its destination.
    Retain,
}

/// What happens when two present source claims target one destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// The rule listed last in the table wins.
    #[default]
    LastWins,
    /// The mapping fails with [`MappingError::ConflictingDestination`].
    Reject,
}

/// Applies a [`ClaimMappings`] rename table in table order.
///
/// For every rule whose source is present in the input, the value is copied
/// to the destination. Unmapped claims pass through unchanged. A destination
/// written by a rule overrides any claim of the same name from the input.
/// Rules always read from the input, so `{a: b, b: a}` swaps two claims.
#[derive(Debug, Clone, Default)]
pub struct TableClaimMappingStrategy {
    mappings: ClaimMappings,
    source_policy: SourcePolicy,
    conflict_policy: ConflictPolicy,
}

impl TableClaimMappingStrategy {
    pub fn new(mappings: ClaimMappings) -> Self {
        Self {
            mappings,
            ..Self::default()
        }
    }

    pub fn with_source_policy(mut self, policy: SourcePolicy) -> Self {
        self.source_policy = policy;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn mappings(&self) -> &ClaimMappings {
        &self.mappings
    }
}

impl ClaimMappingStrategy for TableClaimMappingStrategy {
    fn map_claims(&self, claims: &Claims) -> Result<Claims, MappingError> {
        let mut mapped = claims.clone();

        if self.source_policy == SourcePolicy::Rename {
            for rule in self.mappings.iter() {
                mapped.remove(&rule.source);
            }
        }

        // destination -> source of the rule that wrote it
        let mut written: HashMap<&str, &str> = HashMap::new();
        for rule in self.mappings.iter() {
            let Some(value) = claims.get(&rule.source) else {
                continue;
            };
            if let Some(previous) = written.insert(&rule.destination, &rule.source) {
                if self.conflict_policy == ConflictPolicy::Reject {
                    return Err(MappingError::ConflictingDestination {
                        destination: rule.destination.clone(),
                        first: previous.to_string(),
                        second: rule.source.clone(),
                    });
                }
            }
            mapped.insert(rule.destination.clone(), value.clone());
        }

        Ok(mapped)
    }
}

/// Leaves claims untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughClaimMappingStrategy;

impl ClaimMappingStrategy for PassthroughClaimMappingStrategy {
    fn map_claims(&self, claims: &Claims) -> Result<Claims, MappingError> {
        Ok(claims.clone())
    }
}
