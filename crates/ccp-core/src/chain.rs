//! Runtime state of one traversal of a workflow chain.

use std::sync::Arc;

use ccp_types::error::StoreError;
use ccp_types::workflow;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::decision::Choice;
use crate::dict_literal;
use crate::package::Package;
use crate::repository::Store;

/// Package variable holding the dictionaries merged into every chain context.
pub const REPLACEMENT_DICT_VAR: &str = "replacementDict";

/// Ordered key/value pairs accumulated while a chain runs.
///
/// Cloning yields another handle to the same context, so a pending decision
/// can write into the chain that created it.
#[derive(Debug, Clone, Default)]
pub struct ChainContext {
    inner: Arc<RwLock<IndexMap<String, String>>>,
}

impl ChainContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.write().await.insert(key.into(), value.into());
    }

    pub async fn update<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut inner = self.inner.write().await;
        for (k, v) in pairs {
            inner.insert(k.into(), v.into());
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn snapshot(&self) -> IndexMap<String, String> {
        self.inner.read().await.clone()
    }
}

/// A chain being traversed by a package.
#[derive(Debug, Clone)]
pub struct Chain {
    pub definition: workflow::Chain,
    pub context: ChainContext,
    /// Choices generated by a script earlier in the chain, offered by a
    /// later decision.
    pub generated_choices: Vec<Choice>,
}

impl Chain {
    pub fn new(definition: workflow::Chain) -> Self {
        Self {
            definition,
            context: ChainContext::new(),
            generated_choices: Vec::new(),
        }
    }

    /// Seed the context with the package's stored replacement dictionaries.
    pub async fn load<S: Store>(&mut self, store: &S, pkg: &Package) -> Result<(), StoreError> {
        let vars = store
            .read_unit_vars(pkg.id(), pkg.package_type(), REPLACEMENT_DICT_VAR)
            .await?;

        for var in vars {
            let Some(value) = var.value else { continue };
            match dict_literal::parse(&value) {
                Ok(map) => self.context.update(map).await,
                Err(e) => {
                    tracing::error!(package_id = %pkg.id(), value = %value, error = %e, "failed to parse package variable");
                }
            }
        }

        let len = self.context.len().await;
        tracing::debug!(
            package_id = %pkg.id(),
            chain_id = %self.definition.id,
            len,
            "chain context loaded"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccp_types::package::PackageType;
    use ccp_types::store::UnitVarValue;
    use ccp_types::workflow::I18nField;
    use uuid::Uuid;

    use crate::testing::MemoryStore;

    fn definition() -> workflow::Chain {
        workflow::Chain {
            id: Uuid::now_v7(),
            description: I18nField::new("Store AIP"),
            link_id: Uuid::now_v7(),
            available: true,
        }
    }

    #[tokio::test]
    async fn test_context_handles_share_state() {
        let chain = Chain::new(definition());
        let handle = chain.context.clone();
        handle.set("%AIPsStore%", "/aips").await;
        assert_eq!(chain.context.get("%AIPsStore%").await.as_deref(), Some("/aips"));
    }

    #[tokio::test]
    async fn test_context_preserves_insertion_order() {
        let ctx = ChainContext::new();
        ctx.update([("b", "1"), ("a", "2")]).await;
        ctx.set("b", "3").await;
        let snapshot = ctx.snapshot().await;
        let keys: Vec<_> = snapshot.keys().cloned().collect();
        assert_eq!(keys, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(snapshot["b"], "3");
    }

    #[tokio::test]
    async fn test_load_skips_unparseable_dicts() {
        let store = MemoryStore::new();
        let pkg = Package::for_tests(PackageType::Sip, "/shared/", "/shared/currentlyProcessing/foo/");
        for value in ["{'%a%': '1'}", "not a dict", "{'%b%': '2'}"] {
            store
                .create_unit_var(
                    pkg.id(),
                    PackageType::Sip,
                    REPLACEMENT_DICT_VAR,
                    UnitVarValue::Value(value.to_string()),
                    false,
                )
                .await
                .unwrap();
        }

        let mut chain = Chain::new(definition());
        chain.load(&store, &pkg).await.unwrap();
        let snapshot = chain.context.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["%b%"], "2");
    }
}
