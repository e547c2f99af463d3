//! Result type alias for the aggregator

use super::errors::AggregatorError;

/// Result type alias for aggregator operations
///
/// # Examples
///
/// ```
/// use aggregator::domain::result::Result;
/// use aggregator::domain::errors::AggregatorError;
///
/// fn example_function() -> Result<String> {
///     Ok("success".to_string())
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(AggregatorError::Validation("Invalid input".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, AggregatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_with_question_mark() -> Result<()> {
        fn inner() -> Result<i32> {
            Ok(42)
        }

        let value = inner()?;
        assert_eq!(value, 42);
        Ok(())
    }
}
