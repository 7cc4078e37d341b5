use {
    super::{NodesForKey, QuorumEngine},
    crate::{BoxError, DeferredProcessor, EntryClient, OperationConfig},
    async_trait::async_trait,
    std::sync::Arc,
};

/// Consumer of deferred deletions: runs a quorum DELETE per queued key.
pub struct DeferredDeleteProcessor<C> {
    engine: Arc<QuorumEngine<C>>,
    config: OperationConfig,
}

impl<C> DeferredDeleteProcessor<C> {
    pub fn new(engine: Arc<QuorumEngine<C>>, config: OperationConfig) -> Self {
        Self { engine, config }
    }
}

#[async_trait]
impl<C: EntryClient + 'static> DeferredProcessor<NodesForKey> for DeferredDeleteProcessor<C> {
    async fn process(&self, nodes: NodesForKey) -> Result<(), BoxError> {
        let result = self.engine.delete(&nodes, &self.config).await;
        if result.succeeded_minimally() {
            Ok(())
        } else {
            Err(format!("deferred delete failed: {result}").into())
        }
    }
}
