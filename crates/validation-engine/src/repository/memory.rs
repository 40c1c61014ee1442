use super::{LabelStore, RuleFilter, RuleRepository};
use crate::error::Result;
use crate::models::ValidationRule;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct InMemoryRuleRepository {
    rules: Arc<DashMap<Uuid, ValidationRule>>,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn get(&self, id: Uuid) -> Result<Option<ValidationRule>> {
        Ok(self.rules.get(&id).map(|r| r.value().clone()))
    }

    async fn find(&self, filter: RuleFilter) -> Result<Vec<ValidationRule>> {
        let mut rules: Vec<ValidationRule> = self
            .rules
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn upsert(&self, rule: &ValidationRule) -> Result<()> {
        self.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.rules.remove(&id).is_some())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryLabelStore {
    labels: Arc<DashSet<String>>,
}

impl InMemoryLabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for label in labels {
            store.add_label(label);
        }
        store
    }

    pub fn add_label(&self, key: impl Into<String>) {
        self.labels.insert(key.into());
    }
}

#[async_trait]
impl LabelStore for InMemoryLabelStore {
    async fn label_exists(&self, key: &str) -> Result<bool> {
        Ok(self.labels.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rule_repository_crud() {
        let repo = InMemoryRuleRepository::new();
        let type_id = Uuid::new_v4();
        let b = ValidationRule::new(type_id, "B", "a > 1");
        let a = ValidationRule::new(type_id, "A", "a > 2").inactive();

        repo.upsert(&b).await.unwrap();
        repo.upsert(&a).await.unwrap();
        assert_eq!(repo.len(), 2);

        let all = repo.find(RuleFilter::by_type(type_id)).await.unwrap();
        assert_eq!(all.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["A", "B"]);

        let active = repo.find(RuleFilter::by_type(type_id).active_only()).await.unwrap();
        assert_eq!(active.len(), 1);

        assert!(repo.delete(b.id).await.unwrap());
        assert!(!repo.delete(b.id).await.unwrap());
        assert!(repo.get(b.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_label_store() {
        let labels = InMemoryLabelStore::with_labels(["AMOUNT_INVALID"]);
        assert!(labels.label_exists("AMOUNT_INVALID").await.unwrap());
        assert!(!labels.label_exists("MISSING").await.unwrap());
    }
}
