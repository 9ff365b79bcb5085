pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod memory;

#[cfg(test)]
mod tests {
    use super::error::AppError;

    #[test]
    fn app_error_is_structured() {
        let err = AppError::new("INDEX_UNAVAILABLE", "index missing").with_retryable(true);
        assert_eq!(err.code, "INDEX_UNAVAILABLE");
        assert_eq!(err.message, "index missing");
        assert!(err.retryable);
        assert!(err.has_code("INDEX_UNAVAILABLE"));
        assert_eq!(err.to_string(), "[INDEX_UNAVAILABLE] index missing");
    }
}
