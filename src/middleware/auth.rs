use std::sync::Arc;
use tracing::debug;

use crate::auth::{AuthenticatorCollection, Authenticator};
use crate::config::paths::AUTHENTICATOR_NONE;
use crate::handler::{Handler, Request};

/// Pick the authenticator for a path: the path's own wins; without one, the
/// backend's applies unless the path opted out with `none`
pub fn resolve_authenticator(
    path_authenticator: Option<&str>,
    backend_authenticator: Option<&str>,
    authenticators: &AuthenticatorCollection,
) -> Option<Arc<Authenticator>> {
    match path_authenticator {
        Some(AUTHENTICATOR_NONE) => None,
        Some(name) => authenticators.get(name).cloned(),
        None => backend_authenticator.and_then(|name| authenticators.get(name).cloned()),
    }
}

/// Reject requests the authenticator does not accept
pub fn create_auth_middleware(authenticator: Arc<Authenticator>, next: Handler) -> Handler {
    Handler::new(move |request: Request| {
        let next = next.clone();
        let authenticator = authenticator.clone();
        async move {
            match authenticator.authenticate(request.headers()) {
                Ok(()) => next.call(request).await,
                Err(rejection) => {
                    debug!(
                        authenticator = %authenticator.name(),
                        path = %request.uri().path(),
                        ?rejection,
                        "Request rejected"
                    );
                    authenticator.challenge(&rejection)
                }
            }
        }
    })
}
