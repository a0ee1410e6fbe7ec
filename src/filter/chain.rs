//! Filter chain execution.

use crate::config::FilterDefinition;
use crate::error::GatewayError;
use crate::filter::{FilterOutcome, FilterRegistry};
use crate::http::context::RequestContext;

/// Run `definitions` (already in ascending order) against `ctx`.
///
/// Stops at the first rejection. A name missing from the registry fails
/// the request as an unexpected error.
pub fn run_filters(
    registry: &FilterRegistry,
    definitions: &[FilterDefinition],
    ctx: &mut RequestContext,
) -> Result<(), GatewayError> {
    for definition in definitions {
        let Some(filter) = registry.get(&definition.name) else {
            tracing::error!(filter = %definition.name, request_id = %ctx.request_id, "Filter not registered");
            return Err(GatewayError::Unexpected(format!(
                "filter '{}' is not registered",
                definition.name
            )));
        };

        match filter.apply(ctx, &definition.args) {
            FilterOutcome::Continue => {}
            FilterOutcome::Reject { status, message } => {
                tracing::debug!(
                    filter = %definition.name,
                    request_id = %ctx.request_id,
                    status = status.as_u16(),
                    "Request rejected by filter"
                );
                return Err(GatewayError::FilterRejected { status, message });
            }
        }
    }
    Ok(())
}
