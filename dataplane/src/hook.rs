//! Application logic plugged into the data flow lifecycle.

use crate::flow::DataFlow;
use async_trait::async_trait;

/// Application logic run at one step of a data flow's lifecycle.
///
/// A hook receives the flow as the SDK sees it and returns the flow to persist. It may change the
/// flow, for example by setting a data address or moving it to an intermediate state such as
/// [`Preparing`](crate::State::Preparing) to signal that the step completes asynchronously.
/// Returning an error aborts the step without saving anything.
///
/// Any `Fn(DataFlow) -> anyhow::Result<DataFlow>` closure is a hook. Implement the trait directly
/// for hooks that need to await.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, flow: DataFlow) -> anyhow::Result<DataFlow>;
}

#[async_trait]
impl<F> Hook for F
where
    F: Fn(DataFlow) -> anyhow::Result<DataFlow> + Send + Sync,
{
    async fn call(&self, flow: DataFlow) -> anyhow::Result<DataFlow> {
        self(flow)
    }
}

/// A hook which accepts every flow unchanged.
pub fn accept(flow: DataFlow) -> anyhow::Result<DataFlow> {
    Ok(flow)
}
