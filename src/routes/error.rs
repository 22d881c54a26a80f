use thiserror::Error;

/// Startup-phase registration errors. Any of these aborts the whole registration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("unknown backend provider in backend options. backendName: {backend}, backendProvider: {provider}")]
    UnknownProvider { backend: String, provider: String },

    #[error("only one backend can be marked as default. Found both {first} and {second}")]
    DefaultConflict { first: String, second: String },

    #[error("could not find cache named [{0}]")]
    MissingCache(String),

    #[error("could not find backend client named [{0}]")]
    MissingClient(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("backend {backend}: {message}")]
    Provider { backend: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = RouteError::UnknownProvider {
            backend: "test".to_string(),
            provider: "foo".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unknown backend provider in backend options. backendName: test, backendProvider: foo"
        );

        let err = RouteError::DefaultConflict {
            first: "a".to_string(),
            second: "b".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "only one backend can be marked as default. Found both a and b"
        );

        assert_eq!(
            RouteError::MissingCache("c1".to_string()).to_string(),
            "could not find cache named [c1]"
        );
        assert_eq!(
            RouteError::MissingClient("b1".to_string()).to_string(),
            "could not find backend client named [b1]"
        );
    }
}
