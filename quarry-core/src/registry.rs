//! Dataset registry: the name-keyed store that wires stages together.
//!
//! A registry lives for exactly one job execution. Stages write to it through
//! `&mut` borrows and functions read from it through `&` borrows, so there is
//! no internal locking. Datasets and running streaming queries live in separate
//! namespaces; within each, a name is registered at most once.

use crate::dataset::Dataset;
use crate::engine::RunningQuery;
use crate::error::RegistryError;
use std::collections::HashMap;
use tracing::debug;

pub struct DatasetRegistry {
    datasets: HashMap<String, Dataset>,
    order: Vec<String>,
    queries: HashMap<String, RunningQuery>,
    query_order: Vec<String>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self {
            datasets: HashMap::new(),
            order: Vec::new(),
            queries: HashMap::new(),
            query_order: Vec::new(),
        }
    }

    /// Register a dataset. Fails if the name is taken; the existing entry is left untouched.
    pub fn register(&mut self, name: &str, dataset: Dataset) -> Result<(), RegistryError> {
        if self.datasets.contains_key(name) {
            return Err(RegistryError::DuplicateName {
                name: name.to_string(),
                namespace: "dataset",
            });
        }
        debug!(dataset = %name, mode = %dataset.mode(), "Registering dataset");
        self.datasets.insert(name.to_string(), dataset);
        self.order.push(name.to_string());
        Ok(())
    }

    /// Look up a dataset by name.
    pub fn get(&self, name: &str) -> Result<&Dataset, RegistryError> {
        self.datasets
            .get(name)
            .ok_or_else(|| RegistryError::UnresolvedReference {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    /// Register a running streaming query under a load stage's name.
    pub fn register_query(&mut self, name: &str, query: RunningQuery) -> Result<(), RegistryError> {
        if self.queries.contains_key(name) {
            return Err(RegistryError::DuplicateName {
                name: name.to_string(),
                namespace: "streaming query",
            });
        }
        debug!(query = %name, id = %query.id(), "Registering streaming query");
        self.queries.insert(name.to_string(), query);
        self.query_order.push(name.to_string());
        Ok(())
    }

    pub fn query(&self, name: &str) -> Option<&RunningQuery> {
        self.queries.get(name)
    }

    /// Dataset names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Running queries in registration order.
    pub fn queries(&self) -> Vec<(&str, &RunningQuery)> {
        self.query_order
            .iter()
            .filter_map(|n| self.queries.get(n).map(|q| (n.as_str(), q)))
            .collect()
    }

    /// Number of registered datasets.
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Hand every running query to the caller, in registration order.
    pub fn into_queries(mut self) -> Vec<(String, RunningQuery)> {
        self.query_order
            .drain(..)
            .filter_map(|n| self.queries.remove(&n).map(|q| (n, q)))
            .collect()
    }
}

impl Default for DatasetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DatasetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetRegistry")
            .field("datasets", &self.order)
            .field("queries", &self.query_order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::schema::{DataType, Schema};

    fn dataset(name: &str) -> Dataset {
        Dataset::batch(name, Frame::empty(Schema::of(&[("x", DataType::String)])))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = DatasetRegistry::new();
        registry.register("a", dataset("a")).unwrap();
        assert!(registry.contains("a"));
        assert_eq!(registry.get("a").unwrap().name(), "a");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let mut registry = DatasetRegistry::new();
        registry.register("a", dataset("first")).unwrap();
        let err = registry.register("a", dataset("second")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateName {
                name: "a".into(),
                namespace: "dataset"
            }
        );
        assert_eq!(registry.get("a").unwrap().name(), "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_is_unresolved() {
        let mut registry = DatasetRegistry::new();
        registry.register("a", dataset("a")).unwrap();
        let err = registry.get("b").unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnresolvedReference { name: "b".into() }
        );
        assert_eq!(registry.names(), &["a".to_string()]);
    }

    #[test]
    fn test_names_preserve_registration_order() {
        let mut registry = DatasetRegistry::default();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(name, dataset(name)).unwrap();
        }
        assert_eq!(registry.names(), &["zeta", "alpha", "mid"]);
        assert!(registry.queries().is_empty());
        assert!(registry.into_queries().is_empty());
    }
}
