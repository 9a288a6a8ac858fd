//! Persistence of data flows.

use crate::{error::Error, flow::DataFlow};
use async_std::sync::{Arc, RwLock};
use async_trait::async_trait;
use std::collections::HashMap;

/// Storage for the data flows known to a data plane.
#[async_trait]
pub trait DataFlowStore: Send + Sync {
    /// Insert or replace a data flow, keyed by its ID.
    async fn save(&self, flow: &DataFlow) -> Result<(), Error>;

    /// Load the data flow with the given ID.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if no such flow has been saved.
    async fn find_by_id(&self, id: &str) -> Result<DataFlow, Error>;
}

/// A [`DataFlowStore`] kept in memory.
///
/// Flows are stored as serialized JSON documents, so every load returns an independent copy and
/// changes to a loaded flow only take effect once it is saved again. Clones of this store share
/// the same contents.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDataFlowStore {
    flows: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryDataFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataFlowStore for InMemoryDataFlowStore {
    async fn save(&self, flow: &DataFlow) -> Result<(), Error> {
        let doc = serde_json::to_string(flow)?;
        self.flows.write().await.insert(flow.id().to_string(), doc);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<DataFlow, Error> {
        let flows = self.flows.read().await;
        let doc = flows.get(id).ok_or_else(|| Error::NotFound { id: id.into() })?;
        Ok(serde_json::from_str(doc)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::flow::State;

    #[async_std::test]
    async fn test_save_and_find() {
        let store = InMemoryDataFlowStore::new();
        let flow = DataFlow::new("flow").with_transfer_type("HttpData-PUSH");
        store.save(&flow).await.unwrap();
        assert_eq!(store.find_by_id("flow").await.unwrap(), flow);
    }

    #[async_std::test]
    async fn test_not_found() {
        let store = InMemoryDataFlowStore::new();
        match store.find_by_id("missing").await {
            Err(Error::NotFound { id }) => assert_eq!(id, "missing"),
            res => panic!("expected NotFound, got {res:?}"),
        }
    }

    #[async_std::test]
    async fn test_loaded_copy_is_independent() {
        let store = InMemoryDataFlowStore::new();
        store.save(&DataFlow::new("flow")).await.unwrap();

        let mut loaded = store.find_by_id("flow").await.unwrap();
        loaded.transition_to_completed();
        assert_eq!(
            store.find_by_id("flow").await.unwrap().state(),
            State::Initiating
        );

        // Clones see each other's writes.
        store.clone().save(&loaded).await.unwrap();
        assert_eq!(
            store.find_by_id("flow").await.unwrap().state(),
            State::Completed
        );
    }
}
