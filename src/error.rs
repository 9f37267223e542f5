use thiserror::Error;

/// Error kinds the orchestrator classifies failures into.
///
/// Each kind maps to a process exit code in `main`: `Config` and
/// `State` exit 1 (operator must fix local state before retrying),
/// everything remote-facing exits 2.
#[derive(Debug, Error)]
pub enum TakoError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("preflight error: {0}")]
    Preflight(String),
    #[error("transient remote error: {0}")]
    TransientRemote(String),
    #[error("rollout error: {0}")]
    Rollout(String),
    #[error("state error: {0}")]
    State(String),
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl TakoError {
    pub fn exit_code(&self) -> i32 {
        match self {
            TakoError::Config(_) => 1,
            TakoError::State(_) => 1,
            TakoError::Preflight(_) => 2,
            TakoError::TransientRemote(_) => 2,
            TakoError::Rollout(_) => 2,
            TakoError::Fatal(_) => 2,
        }
    }
}

/// Walk an anyhow error chain looking for a `TakoError` to classify the
/// failure for the process exit code. Unclassified errors (plain `anyhow!`,
/// I/O errors bubbled up without wrapping) are treated as remote/infra
/// failures (exit 2) rather than configuration failures (exit 1), since
/// config errors are expected to be classified explicitly at validation time.
pub fn classify(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(tako) = cause.downcast_ref::<TakoError>() {
            return tako.exit_code();
        }
    }
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        let err = TakoError::Rollout("web failed".to_string());
        assert_eq!(err.to_string(), "rollout error: web failed");
    }

    #[test]
    fn classify_finds_wrapped_tako_error() {
        let err = anyhow::Error::new(TakoError::Config("bad yaml".to_string())).context("loading tako.yaml");
        assert_eq!(classify(&err), 1);
    }

    #[test]
    fn classify_defaults_unclassified_errors_to_exit_2() {
        let err = anyhow::anyhow!("something broke");
        assert_eq!(classify(&err), 2);
    }
}
