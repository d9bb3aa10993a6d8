use thiserror::Error;

/// Failure of one sampling cycle. Never surfaced to the consumer: sampler
/// loops log it and try again on the next interval.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SampleError {
    #[error("{call} failed: {detail}")]
    Query { call: &'static str, detail: String },

    #[error("{0} is not available")]
    Unavailable(&'static str),

    #[error("sampler stopped mid-cycle")]
    Stopped,
}

impl SampleError {
    pub fn query(call: &'static str, detail: impl Into<String>) -> Self {
        SampleError::Query {
            call,
            detail: detail.into(),
        }
    }
}

pub type SampleResult<T> = Result<T, SampleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_error_names_the_call() {
        let err = SampleError::query("collect_counters", "access denied");
        assert_eq!(err.to_string(), "collect_counters failed: access denied");
    }
}
