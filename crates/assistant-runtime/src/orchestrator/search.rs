use shared::models::Listing;
use shared::search::{FilterSpec, compile};
use tracing::debug;

use super::Pipeline;
use crate::error::PipelineError;
use crate::observer::PipelineStage;

pub(super) async fn query_listings(
    pipeline: &Pipeline,
    requester_id: &str,
    filter: &FilterSpec,
) -> Result<Vec<Listing>, PipelineError> {
    let predicate = compile(filter);
    debug!(
        requester_id,
        unconstrained = predicate.is_unconstrained(),
        sort_by = ?filter.sort_by(),
        "compiled listing predicate"
    );

    let query = pipeline.listing_store.query(
        &predicate,
        pipeline.config.search_result_limit,
        filter.sort_by(),
    );
    match tokio::time::timeout(pipeline.config.store_timeout(), query).await {
        Ok(result) => result.map_err(|err| PipelineError::store(PipelineStage::Query, err)),
        Err(_) => Err(PipelineError::UpstreamTimeout {
            stage: PipelineStage::Query,
        }),
    }
}
