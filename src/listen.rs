//! LISTEN/NOTIFY support.
//!
//! A [`Listener`] is created by [`Connection::listen`][1] and yields every
//! `NOTIFY` delivered on its channel. Notifications are routed as they
//! arrive on the wire, including between queries and while rows stream.
//!
//! [1]: crate::Connection::listen
use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::Stream;
use tokio::sync::mpsc;

use crate::common::ByteStr;

/// An asynchronous notification raised by `NOTIFY`.
#[derive(Clone, Debug)]
pub struct Notification {
    /// The process ID of the notifying backend.
    pub process_id: u32,
    /// The channel the notification was raised on.
    pub channel: ByteStr,
    /// The payload string, empty when `NOTIFY` carried none.
    pub payload: ByteStr,
}

/// A stream of [`Notification`]s for one channel subscription.
///
/// Dropping the listener unsubscribes: the connection sends `UNLISTEN`
/// once it notices the subscriber is gone.
#[derive(Debug)]
pub struct Listener {
    channel: String,
    recv: mpsc::UnboundedReceiver<Notification>,
}

impl Listener {
    pub(crate) fn new(channel: String, recv: mpsc::UnboundedReceiver<Notification>) -> Self {
        Self { channel, recv }
    }

    /// The channel this listener is subscribed to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receive the next notification.
    ///
    /// Returns `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.recv.recv().await
    }
}

impl Stream for Listener {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.recv.poll_recv(cx)
    }
}
