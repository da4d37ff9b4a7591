use crate::error::ApiError;

pub async fn metrics_handler() -> Result<String, ApiError> {
    Ok(crate::metrics::render()?)
}
