use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum KtestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("suite '{suite}' exceeded its {budget:?} budget")]
    SuiteTimeout { suite: String, budget: Duration },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, KtestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_config() {
        let err = KtestError::Config("missing image path".into());
        assert_eq!(err.to_string(), "configuration error: missing image path");
    }

    #[test]
    fn test_display_transport() {
        let err = KtestError::Transport("ssh handshake failed".into());
        assert_eq!(err.to_string(), "transport error: ssh handshake failed");
    }

    #[test]
    fn test_display_protocol() {
        let err = KtestError::Protocol("prompt not available".into());
        assert_eq!(err.to_string(), "protocol error: prompt not available");
    }

    #[test]
    fn test_display_timeout() {
        let err = KtestError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "timed out after 30s");
    }

    #[test]
    fn test_display_suite_timeout() {
        let err = KtestError::SuiteTimeout {
            suite: "syscalls".into(),
            budget: Duration::from_secs(3600),
        };
        assert_eq!(
            err.to_string(),
            "suite 'syscalls' exceeded its 3600s budget"
        );
    }

    #[test]
    fn test_display_internal() {
        let err = KtestError::Internal("classifier saw no stdout and no returncode".into());
        assert_eq!(
            err.to_string(),
            "internal error: classifier saw no stdout and no returncode"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KtestError>();
    }

    #[test]
    fn test_display_boundary_values() {
        let err = KtestError::Timeout(Duration::ZERO);
        assert_eq!(err.to_string(), "timed out after 0ns");

        let err = KtestError::Config(String::new());
        assert_eq!(err.to_string(), "configuration error: ");
    }
}
