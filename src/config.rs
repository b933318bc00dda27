//! Repository configuration (spec §10.2). Loaded by the caller and handed to
//! the facade constructor — there is no global config singleton, consistent
//! with spec §5's "no global singletons beyond the two caches" rule.

use rsb_derive::Builder;
use std::time::Duration;

#[derive(Debug, Clone, Builder)]
pub struct RepositoryConfig {
    pub mongo_uri: String,

    #[default = "\"firestore_master\".to_string()"]
    pub master_database_name: String,

    #[default = "Duration::from_secs(10)"]
    pub connect_timeout: Duration,

    #[default = "Duration::from_secs(30)"]
    pub operation_timeout: Duration,

    #[default = "Duration::from_secs(300)"]
    pub rules_cache_ttl: Duration,

    #[default = "10_000"]
    pub field_type_cache_capacity: u64,

    #[default = "Duration::from_secs(60)"]
    pub field_type_cache_ttl: Duration,

    /// Mirrors Firestore's own batch-write cap.
    #[default = "500"]
    pub max_batch_operations: usize,

    #[default = "100"]
    pub max_filter_count: usize,

    #[default = "32"]
    pub max_order_count: usize,
}

impl RepositoryConfig {
    pub fn tenant_database_name(&self, organization_id: &str) -> String {
        format!("tenant_{organization_id}_fs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_database_name_follows_naming_convention() {
        let config = RepositoryConfig::new("mongodb://localhost:27017".to_string());
        assert_eq!(config.tenant_database_name("acme"), "tenant_acme_fs");
        assert_eq!(config.master_database_name, "firestore_master");
    }
}
