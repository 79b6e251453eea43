use crate::error::PoolError;
use crate::types::PoolId;
use serde::{Deserialize, Serialize};

/// Registered pool membership entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: PoolId,
    pub region: String,
}

/// Membership list consulted by every cross-pool operation.
///
/// Entries are kept in registration order; that order is the peer iteration order used by
/// redistribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRegistry {
    entries: Vec<RegistryEntry>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a region under the given identifier.
    ///
    /// Region names are compared case-insensitively after trimming.
    pub fn register(&mut self, id: PoolId, region: &str) -> Result<(), PoolError> {
        let region = region.trim();
        if region.is_empty() {
            return Err(PoolError::validation("region name must not be empty"));
        }
        if self.find_region(region).is_some() {
            return Err(PoolError::validation(format!(
                "region '{}' already has a pool",
                region
            )));
        }
        if self.contains(id) {
            return Err(PoolError::validation(format!("{} already registered", id)));
        }
        self.entries.push(RegistryEntry {
            id,
            region: region.to_string(),
        });
        Ok(())
    }

    pub fn contains(&self, id: PoolId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn find_region(&self, region: &str) -> Option<PoolId> {
        let region = region.trim();
        self.entries
            .iter()
            .find(|entry| entry.region.eq_ignore_ascii_case(region))
            .map(|entry| entry.id)
    }

    /// Every registered pool except `origin`, in registration order.
    pub fn peers_of(&self, origin: PoolId) -> Vec<PoolId> {
        self.entries
            .iter()
            .map(|entry| entry.id)
            .filter(|id| *id != origin)
            .collect()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check a cross-pool call against `source`: caller and destination must both be registered
    /// and the destination must differ from the pool paying out.
    pub fn authorize_transfer(
        &self,
        caller: PoolId,
        source: PoolId,
        destination: PoolId,
    ) -> Result<(), PoolError> {
        if !self.contains(caller) {
            return Err(PoolError::UnauthorizedCaller(format!(
                "{} is not a registered pool",
                caller
            )));
        }
        if !self.contains(destination) {
            return Err(PoolError::UnauthorizedCaller(format!(
                "destination {} is not a registered pool",
                destination
            )));
        }
        if source == destination {
            return Err(PoolError::validation(format!(
                "{} cannot transfer to itself",
                source
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PoolRegistry {
        let mut registry = PoolRegistry::new();
        registry.register(PoolId(0), "north").unwrap();
        registry.register(PoolId(1), "south").unwrap();
        registry.register(PoolId(2), "east").unwrap();
        registry
    }

    #[test]
    fn rejects_duplicate_region_case_insensitively() {
        let mut registry = registry();
        let err = registry.register(PoolId(3), " North ").unwrap_err();
        assert!(matches!(err, PoolError::Validation(_)));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn peers_follow_registration_order() {
        let registry = registry();
        assert_eq!(registry.peers_of(PoolId(1)), vec![PoolId(0), PoolId(2)]);
    }

    #[test]
    fn authorize_transfer_requires_registered_pools() {
        let registry = registry();
        assert!(registry
            .authorize_transfer(PoolId(0), PoolId(1), PoolId(0))
            .is_ok());
        assert!(matches!(
            registry.authorize_transfer(PoolId(9), PoolId(1), PoolId(0)),
            Err(PoolError::UnauthorizedCaller(_))
        ));
        assert!(matches!(
            registry.authorize_transfer(PoolId(0), PoolId(1), PoolId(7)),
            Err(PoolError::UnauthorizedCaller(_))
        ));
        assert!(matches!(
            registry.authorize_transfer(PoolId(1), PoolId(1), PoolId(1)),
            Err(PoolError::Validation(_))
        ));
    }
}
