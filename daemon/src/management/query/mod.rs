mod source;

use async_trait::async_trait;
use gsm_protocol::management::instance::QueryResponse;

pub use source::SourceQuery;

/// Asks a running server for its live status over the game's query protocol.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn query(&self, host: &str, port: u16) -> anyhow::Result<QueryResponse>;
}
