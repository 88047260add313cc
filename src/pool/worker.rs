//! The pool worker task.
//!
//! All pool bookkeeping lives in one future polled by the runtime: waiter
//! queueing, connection creation with backoff, keepalive probing, idle
//! eviction and drain on shutdown. Handles talk to it over an unbounded
//! channel, so no lock is held across a suspension point anywhere.
use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    time::{Instant, Sleep, sleep},
};

use super::{PoolClosed, PoolConfig};
use crate::{Connection, Result, common::verbose};

/// Fallback maintenance cycle when no keepalive is configured.
const IDLE_CYCLE: Duration = Duration::from_secs(30);

pub(super) struct WorkerHandle {
    send: UnboundedSender<WorkerMessage>,
    state: State,
}

enum State {
    Idle,
    Recv(AcquireRecv),
}

impl WorkerHandle {
    pub fn new(config: PoolConfig) -> (Self, WorkerFuture) {
        let (send, recv) = mpsc::unbounded_channel();
        (
            Self { send, state: State::Idle },
            WorkerFuture {
                config,
                actives: 0,
                conns: VecDeque::new(),
                queue: VecDeque::with_capacity(1),
                sleep: Box::pin(sleep(IDLE_CYCLE)),
                recv,
                connecting: None,
                backoff: None,
                attempts: 0,
                checking: None,
                closing: None,
                draining: false,
            },
        )
    }

    pub fn poll_acquire(&mut self, cx: &mut Context) -> Poll<Result<Connection>> {
        loop {
            match &mut self.state {
                State::Idle => {
                    let (tx, rx) = oneshot::channel();
                    if self.send.send(WorkerMessage::Acquire(tx)).is_err() {
                        return Poll::Ready(Err(PoolClosed.into()));
                    }
                    self.state = State::Recv(rx);
                },
                State::Recv(recv) => {
                    let result = ready!(Pin::new(recv).poll(cx));
                    self.state = State::Idle;
                    return match result {
                        Ok(result) => Poll::Ready(result),
                        // worker dropped the sender mid-drain
                        Err(_) => Poll::Ready(Err(PoolClosed.into())),
                    };
                },
            }
        }
    }

    pub fn release(&self, conn: Connection) {
        // worker gone, the connection just drops
        let _ = self.send.send(WorkerMessage::Release(conn));
    }
}

impl Clone for WorkerHandle {
    fn clone(&self) -> Self {
        Self {
            send: self.send.clone(),
            state: State::Idle,
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WorkerHandle")
    }
}

type AcquireSend = oneshot::Sender<Result<Connection>>;
type AcquireRecv = oneshot::Receiver<Result<Connection>>;

enum WorkerMessage {
    Acquire(AcquireSend),
    Release(Connection),
}

struct IdleConn {
    conn: Connection,
    checked_at: Instant,
    idle_since: Instant,
}

impl IdleConn {
    fn new(conn: Connection, now: Instant) -> Self {
        Self {
            conn,
            checked_at: now,
            idle_since: now,
        }
    }
}

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Connection>> + Send + 'static>>;

/// `min(cap, base * 2^attempt)` plus a jitter of up to `base`.
fn backoff_duration(base: Duration, cap: Duration, attempt: u32) -> Duration {
    use rand::Rng;

    let exp = base.saturating_mul(1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX));
    let capped = exp.min(cap);
    let jitter = Duration::from_millis(
        rand::thread_rng().gen_range(0..=base.as_millis().min(u64::MAX as u128) as u64),
    );
    capped + jitter
}

/// Hand a connection that is not yet in the idle queue to the oldest
/// waiter, or queue it.
///
/// - a new conn is pushed front
/// - a released conn is pushed front
/// - a keepalive survivor is pushed front
///
/// The front of the queue is the most fresh connection.
fn new_connection(
    mut conn: Connection,
    queue: &mut VecDeque<AcquireSend>,
    conns: &mut VecDeque<IdleConn>,
    instant: Instant,
) {
    while let Some(send) = queue.pop_front() {
        if let Err(Ok(_conn)) = send.send(Ok(conn)) {
            // the waiter is gone, try the next one
            conn = _conn;
            continue;
        }

        return;
    }

    conns.push_front(IdleConn::new(conn, instant));
}

pub(super) struct WorkerFuture {
    config: PoolConfig,

    /// Live connections: leased, idle, probing or closing.
    actives: usize,
    conns: VecDeque<IdleConn>,
    queue: VecDeque<AcquireSend>,

    sleep: Pin<Box<Sleep>>,
    recv: UnboundedReceiver<WorkerMessage>,

    connecting: Option<ConnectFuture>,
    backoff: Option<Pin<Box<Sleep>>>,
    attempts: u32,
    /// The keepalive slot; a connection in here is not leasable.
    checking: Option<Connection>,
    closing: Option<Connection>,
    draining: bool,
}

impl Future for WorkerFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let WorkerFuture {
            config, actives, conns, queue,
            sleep: keepalive_sleep, recv,
            connecting, backoff, attempts, checking, closing, draining,
        } = self.as_mut().get_mut();
        let sleep_field = keepalive_sleep;

        macro_rules! tracew {
            ($prefix:literal) => {
                verbose!(
                    "{:11}: Active={actives}, Idle={}, Queued={}, Connecting={}, Checking={}, Closing={}",
                    $prefix,
                    conns.len(),
                    queue.len(),
                    connecting.is_some() as u8,
                    checking.is_some() as u8,
                    closing.is_some() as u8,
                );
            };
        }

        macro_rules! spawn_connect {
            ($limit:expr) => {
                if !*draining
                    && connecting.is_none()
                    && backoff.is_none()
                    && *actives < $limit
                {
                    *connecting = Some(Box::pin(Connection::connect_with(config.conn.clone())));
                }
            };
        }

        // NOTE:
        // 1. Collect all requests upfront
        // 2. Poll connect / backoff / keepalive / close slots
        // With the highest chance of a connection available:
        // 3. Try to fulfill the queue

        while let Poll::Ready(msg) = recv.poll_recv(cx) {
            let Some(msg) = msg else {
                // every pool handle is dropped, start draining
                *draining = true;
                *connecting = None;
                *backoff = None;
                while let Some(send) = queue.pop_front() {
                    let _ = send.send(Err(PoolClosed.into()));
                }
                break;
            };

            match msg {
                WorkerMessage::Acquire(send) => {
                    match conns.pop_front() {
                        Some(idle) => {
                            let checked_at = idle.checked_at;
                            if let Err(Ok(conn)) = send.send(Ok(idle.conn)) {
                                conns.push_front(IdleConn {
                                    conn,
                                    checked_at,
                                    idle_since: Instant::now(),
                                });
                            }
                        },
                        None => {
                            queue.push_back(send);
                            spawn_connect!(config.max_conn);
                        },
                    }

                    tracew!("Acquire");
                },
                WorkerMessage::Release(mut conn) => {
                    if *draining {
                        conns.push_back(IdleConn::new(conn, Instant::now()));
                    } else if checking.is_none() {
                        // `poll_ready` usually resolves in one poll
                        match conn.poll_ready(cx) {
                            Poll::Ready(Ok(_)) => {
                                new_connection(conn, queue, conns, Instant::now());
                            },
                            Poll::Ready(Err(_err)) => {
                                #[cfg(feature = "log")]
                                log::error!("released connection unusable: {_err}");

                                if closing.is_some() {
                                    drop(conn);
                                    *actives -= 1;
                                } else {
                                    *closing = Some(conn);
                                }
                            },
                            Poll::Pending => {
                                *checking = Some(conn);
                            },
                        }
                    } else {
                        // recheck soon, the slot is busy
                        let now = Instant::now();
                        conns.push_back(IdleConn {
                            conn,
                            checked_at: now.checked_sub(IDLE_CYCLE).unwrap_or(now),
                            idle_since: now,
                        });
                    }

                    tracew!("Release");
                },
            }
        }

        if let Some(Poll::Ready(result)) = connecting.as_mut().map(|e| e.as_mut().poll(cx)) {
            connecting.take();
            match result {
                Ok(conn) => {
                    *actives += 1;
                    *attempts = 0;
                    new_connection(conn, queue, conns, Instant::now());

                    tracew!("Connected");
                },
                Err(err) => {
                    #[cfg(feature = "log")]
                    log::error!("failed to connect: {err}");

                    let delay = backoff_duration(config.backoff_base, config.backoff_cap, *attempts);
                    *attempts = attempts.saturating_add(1);
                    *backoff = Some(Box::pin(sleep(delay)));

                    if let Some(send) = queue.pop_front() {
                        let _ = send.send(Err(err));
                    }

                    tracew!("Backoff");
                },
            }
        }

        if let Some(Poll::Ready(())) = backoff.as_mut().map(|e| e.as_mut().poll(cx)) {
            backoff.take();
            tracew!("BackoffEnd");
        }

        if let Some(Poll::Ready(result)) = checking.as_mut().map(|e| e.poll_ready(cx)) {
            let conn = checking.take().unwrap();
            match result {
                Ok(()) => {
                    new_connection(conn, queue, conns, Instant::now());
                },
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::error!("keepalive failed: {_err}");

                    if closing.is_some() {
                        drop(conn);
                        *actives -= 1;
                    } else {
                        *closing = Some(conn);
                    }
                },
            }

            reset_sleep(config, conns, sleep_field.as_mut());

            tracew!("Checked");
        }

        if let Some(Poll::Ready(result)) = closing.as_mut().map(|e| e.poll_shutdown(cx)) {
            let _conn = closing.take().unwrap();

            if let Err(_err) = result {
                #[cfg(feature = "log")]
                log::error!("close error: {_err}");
            }

            *actives -= 1;

            tracew!("Closed");
        }

        if !*draining && sleep_field.as_mut().poll(cx).is_ready() {
            // idle eviction: one per cycle, never below the floor
            if closing.is_none() && *actives > config.min_conn {
                if let Some(i) = conns
                    .iter()
                    .position(|e| e.idle_since.elapsed() > config.idle_timeout)
                {
                    let idle = conns.remove(i).unwrap();
                    *closing = Some(idle.conn);
                    tracew!("Evict");
                }
            }

            // keepalive: probe the most overdue connection
            if let Some(keep_alive) = &config.keep_alive {
                if checking.is_none() {
                    if let Some(i) = conns
                        .iter()
                        .position(|e| e.checked_at.elapsed() > keep_alive.frequency)
                    {
                        let mut idle = conns.remove(i).unwrap();
                        idle.conn.keepalive(keep_alive.sql.as_deref());

                        // the probe can resolve in one poll
                        match idle.conn.poll_ready(cx) {
                            Poll::Ready(Ok(_)) => {
                                new_connection(idle.conn, queue, conns, Instant::now());
                            },
                            Poll::Ready(Err(_err)) => {
                                #[cfg(feature = "log")]
                                log::error!("keepalive failed: {_err}");

                                if closing.is_some() {
                                    drop(idle.conn);
                                    *actives -= 1;
                                } else {
                                    *closing = Some(idle.conn);
                                }
                            },
                            Poll::Pending => {
                                *checking = Some(idle.conn);
                            },
                        }

                        tracew!("KeepAlive");
                    }
                }
            }

            reset_sleep(config, conns, sleep_field.as_mut());
        }

        // keep the floor of connections warm
        if *actives < config.min_conn {
            spawn_connect!(config.min_conn);
        }

        while let Some(send) = queue.pop_front() {
            match conns.pop_front() {
                Some(idle) => {
                    let checked_at = idle.checked_at;
                    if let Err(Ok(conn)) = send.send(Ok(idle.conn)) {
                        conns.push_front(IdleConn {
                            conn,
                            checked_at,
                            idle_since: Instant::now(),
                        });
                    }
                },
                None => {
                    queue.push_front(send);
                    // a waiter is already pending, burst up to the hard limit
                    spawn_connect!(config.hard_limit);
                    break;
                },
            }
        }

        if *draining {
            if let Some(conn) = checking.take() {
                conns.push_back(IdleConn::new(conn, Instant::now()));
            }

            loop {
                if closing.is_none() {
                    match conns.pop_front() {
                        Some(idle) => *closing = Some(idle.conn),
                        None => break,
                    }
                }
                match closing.as_mut().unwrap().poll_shutdown(cx) {
                    Poll::Ready(result) => {
                        if let Err(_err) = result {
                            #[cfg(feature = "log")]
                            log::error!("close error: {_err}");
                        }
                        closing.take();
                        *actives -= 1;
                    },
                    Poll::Pending => break,
                }
            }

            tracew!("Draining");

            if *actives == 0 && closing.is_none() && connecting.is_none() {
                return Poll::Ready(());
            }
        }

        Poll::Pending
    }
}

/// Reset `sleep` to the shortest time to the next keepalive or eviction
/// deadline.
fn reset_sleep(config: &PoolConfig, conns: &VecDeque<IdleConn>, sleep: Pin<&mut Sleep>) {
    let frequency = config
        .keep_alive
        .as_ref()
        .map(|k| k.frequency)
        .unwrap_or(IDLE_CYCLE);

    let next = conns.iter().fold(frequency, |acc, c| {
        let probe = frequency.saturating_sub(c.checked_at.elapsed());
        let evict = config.idle_timeout.saturating_sub(c.idle_since.elapsed());
        acc.min(probe).min(evict)
    });

    verbose!("cycle reset to {next:?}");

    sleep.reset(Instant::now() + next);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(30);

        for attempt in 0..24 {
            let d = backoff_duration(base, cap, attempt);
            let exp = base.saturating_mul(1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX));
            let capped = exp.min(cap);
            assert!(d >= capped, "attempt {attempt}: {d:?} < {capped:?}");
            assert!(d <= capped + base, "attempt {attempt}: {d:?} > {:?}", capped + base);
        }
    }

    #[test]
    fn backoff_first_attempt_is_short() {
        let d = backoff_duration(Duration::from_millis(100), Duration::from_secs(30), 0);
        assert!(d <= Duration::from_millis(200));
    }
}
