/// Retry configuration for batch operations
pub(crate) mod retry_config {
    use std::time::Duration;

    /// Calculate retry delay with exponential backoff
    ///
    /// # Arguments
    /// * `attempt` - The retry attempt number (0-based)
    /// * `initial` - Initial delay duration
    /// * `max` - Maximum delay duration
    ///
    /// # Returns
    /// Duration to wait before retrying
    pub(crate) fn retry_delay(attempt: usize, initial: Duration, max: Duration) -> Duration {
        let factor = 2u64.checked_pow(attempt as u32).unwrap_or(u64::MAX);
        let delay_ms = (initial.as_millis() as u64).saturating_mul(factor);
        let capped_delay = delay_ms.min(max.as_millis() as u64);
        Duration::from_millis(capped_delay)
    }
}

/// Key condition expression builder for queries
pub(crate) mod expressions {
    use aws_sdk_dynamodb::types::AttributeValue;

    use crate::table::types::Expression;

    /// Builds a key condition on the partition key and an optional sort key
    ///
    /// Attribute names go through `#hash_key`/`#range_key` placeholders so
    /// reserved words such as `status` or `date` are safe as key names.
    #[derive(Debug)]
    pub struct KeyConditionBuilder {
        expression: Expression,
    }

    impl KeyConditionBuilder {
        /// Condition `partition_key = value`
        pub fn partition_key(field: &str, value: AttributeValue) -> Self {
            Self {
                expression: Expression::new("#hash_key = :hash_value")
                    .name("#hash_key", field)
                    .value(":hash_value", value),
            }
        }

        /// Adds `sort_key = value`
        pub fn sort_key_equals(self, field: &str, value: AttributeValue) -> Self {
            self.sort_clause(field, "#range_key = :range_value", [(":range_value", value)])
        }

        /// Adds `begins_with(sort_key, prefix)`
        pub fn sort_key_begins_with(self, field: &str, prefix: impl Into<String>) -> Self {
            self.sort_clause(
                field,
                "begins_with(#range_key, :range_prefix)",
                [(":range_prefix", AttributeValue::S(prefix.into()))],
            )
        }

        /// Adds `sort_key BETWEEN low AND high`
        pub fn sort_key_between(self, field: &str, low: AttributeValue, high: AttributeValue) -> Self {
            self.sort_clause(
                field,
                "#range_key BETWEEN :range_low AND :range_high",
                [(":range_low", low), (":range_high", high)],
            )
        }

        /// Adds `sort_key > value`
        pub fn sort_key_greater_than(self, field: &str, value: AttributeValue) -> Self {
            self.sort_clause(field, "#range_key > :range_value", [(":range_value", value)])
        }

        /// Adds `sort_key < value`
        pub fn sort_key_less_than(self, field: &str, value: AttributeValue) -> Self {
            self.sort_clause(field, "#range_key < :range_value", [(":range_value", value)])
        }

        /// Finishes the condition
        pub fn build(self) -> Expression {
            self.expression
        }

        fn sort_clause<const N: usize>(
            mut self,
            field: &str,
            clause: &str,
            values: [(&str, AttributeValue); N],
        ) -> Self {
            self.expression.push_clause(clause);
            let mut expression = self.expression.name("#range_key", field);
            for (placeholder, value) in values {
                expression = expression.value(placeholder, value);
            }
            self.expression = expression;
            self
        }
    }
}
