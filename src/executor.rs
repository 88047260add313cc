//! The [`Executor`] trait.
use std::future::Ready;

use crate::{Result, transport::PgTransport};

/// A type that can yield a [`PgTransport`].
///
/// Implemented by `&mut Connection`, [`Pool`][crate::Pool] and
/// `&mut Pool`, so the query API works against either.
pub trait Executor: Unpin {
    /// The returned transport.
    type Transport: PgTransport;

    /// Future that resolves to [`Executor::Transport`].
    type Future: Future<Output = Result<Self::Transport>> + Unpin;

    /// Acquire the transport.
    fn connection(self) -> Self::Future;
}

impl<T: PgTransport> Executor for &mut T {
    type Transport = Self;

    type Future = Ready<Result<Self>>;

    fn connection(self) -> Self::Future {
        std::future::ready(Ok(self))
    }
}
