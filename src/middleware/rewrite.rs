use std::sync::Arc;

use crate::handler::{Handler, Request};
use crate::rewriter::RewriteList;

/// Apply rewriters in order (backend-level first, then path-level) before the
/// request continues down the chain
pub fn create_rewrite_middleware(rewriters: Vec<Arc<RewriteList>>, next: Handler) -> Handler {
    let rewriters = Arc::new(rewriters);
    Handler::new(move |mut request: Request| {
        for rewriter in rewriters.iter() {
            rewriter.apply(&mut request);
        }
        next.call(request)
    })
}
