//! Timers that work under whichever runtime drives the caller.
//!
//! The `async-io` reactor (the one smol uses) backs every timer, except
//! that with the `tokio` feature a caller inside a tokio runtime gets a
//! tokio timer. Enabling the feature never breaks callers on other
//! executors.

use std::future::Future;
use std::time::Duration;

use futures::future::{Either, select};

/// Error returned by [`timeout`] when the deadline passes first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub Duration);

impl std::fmt::Display for Elapsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deadline of {:?} elapsed", self.0)
    }
}

impl std::error::Error for Elapsed {}

/// Sleep for the specified duration
pub async fn sleep(duration: Duration) {
    #[cfg(feature = "tokio")]
    {
        if tokio::runtime::Handle::try_current().is_ok() {
            tokio::time::sleep(duration).await;
            return;
        }
    }

    async_io::Timer::after(duration).await;
}

/// Run `future` to completion unless `duration` passes first.
///
/// On expiry the future is dropped. Whatever side effects it already caused
/// are not rolled back.
pub async fn timeout<F>(duration: Duration, future: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    let future = std::pin::pin!(future);
    let deadline = std::pin::pin!(sleep(duration));

    match select(future, deadline).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(((), _)) => Err(Elapsed(duration)),
    }
}
