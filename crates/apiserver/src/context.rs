use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Per-call context: the acting user and a cancellation token every store or control-plane
/// await is raced against.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user: String,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(user: impl Into<String>) -> Self { Self { user: user.into(), cancel: CancellationToken::new() } }

    /// Context for background work, cancelled with `parent`.
    pub fn background(parent: &CancellationToken) -> Self {
        Self { user: "system".into(), cancel: parent.child_token() }
    }

    /// Await `fut` unless the context is cancelled first; the future is dropped on cancellation.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<Error>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = fut => res.map_err(Into::into),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let ctx = RequestContext::new("alice");
        ctx.cancel.cancel();
        let res: Result<(), Error> = ctx.run(std::future::pending::<Result<(), StoreError>>()).await;
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn passes_results_through() {
        let ctx = RequestContext::new("alice");
        let v = ctx.run(async { Ok::<_, Error>(7) }).await.unwrap();
        assert_eq!(v, 7);
    }
}
