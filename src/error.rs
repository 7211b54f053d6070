//! Typed pipeline errors.
//!
//! Every component returns `Result<T, PipelineError>` at its own boundary;
//! `anyhow::Result` is used above the component boundary (orchestrator,
//! binaries).

use thiserror::Error;

/// The four error kinds from the error-handling design, plus a catch-all
/// for stage failures so the orchestrator can attribute a job failure to
/// a stage number and cause.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("invalid data: {0}")]
    DataInvalid(String),

    #[error("permanent business error: {0}")]
    PermanentBusiness(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("enrichment stage {stage} failed: {source}")]
    Stage {
        stage: u8,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn stage(stage: u8, source: PipelineError) -> Self {
        PipelineError::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// The lowercase-substring permanent-error predicate, applied to the
    /// rendered message of any error the orchestrator catches.
    pub fn is_permanent_message(message: &str) -> bool {
        const MARKERS: &[&str] = &[
            "not found or inactive",
            "missing required",
            "invalid client",
            "no chosen cities",
            "no property types",
        ];
        let lower = message.to_lowercase();
        MARKERS.iter().any(|m| lower.contains(m))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Transient(err.to_string())
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                PipelineError::ConstraintViolation(db_err.to_string())
            }
            other => PipelineError::Transient(other.to_string()),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Transient(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::DataInvalid(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_predicate_matches_any_case() {
        assert!(PipelineError::is_permanent_message(
            "Client Not Found Or Inactive"
        ));
        assert!(PipelineError::is_permanent_message(
            "missing required field: email"
        ));
        assert!(!PipelineError::is_permanent_message("connection reset"));
    }
}
