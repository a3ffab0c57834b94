//! Integration tests for session lifecycle, the send pipeline, and the
//! read loop.
//!
//! Sessions are wired to each other (or to a raw connection) through a
//! connected unix socket pair, so every byte goes through the kernel.

#![cfg(unix)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use netter_protocol::{LengthDelimited, Protocol, ProtocolError};
use netter_session::{
    Handler, Session, SessionConfig, SessionError, SessionIdGenerator,
    SessionState, SharedHandler, handler_fn,
};
use netter_transport::{Connection, ConnectionReader, ConnectionWriter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

// =========================================================================
// Helpers
// =========================================================================

const WAIT: Duration = Duration::from_secs(2);

/// Forwards every received message to a channel the test can read.
struct Collect(mpsc::UnboundedSender<Bytes>);

impl Handler<LengthDelimited> for Collect {
    async fn handle(&self, _session: &Session<LengthDelimited>, message: Bytes) {
        let _ = self.0.send(message);
    }
}

fn collector() -> (SharedHandler<LengthDelimited>, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Collect(tx)), rx)
}

fn ignore() -> SharedHandler<LengthDelimited> {
    Arc::new(handler_fn(|_: &Session<LengthDelimited>, _: Bytes| {}))
}

fn session(
    conn: Connection,
    ids: &SessionIdGenerator,
    handler: SharedHandler<LengthDelimited>,
    send_queue_size: usize,
) -> Session<LengthDelimited> {
    Session::new(
        conn,
        ids.next_id(),
        Arc::new(LengthDelimited::new()),
        handler,
        &SessionConfig::buffered(send_queue_size),
    )
}

/// Two sessions joined by a socket pair: `a` ignores what it receives,
/// `b` forwards it to the returned channel.
fn linked(
    a_queue: usize,
) -> (
    Session<LengthDelimited>,
    Session<LengthDelimited>,
    mpsc::UnboundedReceiver<Bytes>,
) {
    let (a_conn, b_conn) = Connection::pair().expect("socket pair");
    let ids = SessionIdGenerator::new();
    let (handler, rx) = collector();
    let a = session(a_conn, &ids, ignore(), a_queue);
    let b = session(b_conn, &ids, handler, 0);
    (a, b, rx)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Bytes {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("handler channel closed")
}

async fn wait_closed(session: &Session<LengthDelimited>) {
    tokio::time::timeout(WAIT, session.closed())
        .await
        .expect("session should close");
}

fn counting_close_callback(session: &Session<LengthDelimited>) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    session.set_close_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    calls
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_new_session_is_created_and_idle() {
    let (a, _b, _rx) = linked(0);
    assert_eq!(a.state(), SessionState::Created);
    assert!(!a.is_closed());
    assert_eq!(a.send_queue_capacity(), None);
}

#[tokio::test]
async fn test_start_only_runs_once() {
    let (a, _b, _rx) = linked(4);
    assert!(a.start());
    assert_eq!(a.state(), SessionState::Running);
    assert!(!a.start(), "second start must be a no-op");
    assert_eq!(a.state(), SessionState::Running);
}

#[tokio::test]
async fn test_start_after_close_does_nothing() {
    let (a, _b, _rx) = linked(0);
    a.close().unwrap();
    assert!(!a.start());
    assert_eq!(a.state(), SessionState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_close_tears_down_exactly_once() {
    let (a, b, _rx) = linked(8);
    a.start();
    b.start();
    let calls = counting_close_callback(&a);

    let barrier = Arc::new(tokio::sync::Barrier::new(32));
    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let a = a.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                a.close()
            })
        })
        .collect();

    let mut won = 0;
    let mut already_closed = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => won += 1,
            Err(SessionError::Closed) => already_closed += 1,
            Err(other) => panic!("unexpected close error: {other}"),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(already_closed, 31);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The read/write loops exiting call close() again; still only once.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_repeated_close_reports_closed() {
    let (a, _b, _rx) = linked(0);
    assert!(a.close().is_ok());
    assert!(matches!(a.close(), Err(SessionError::Closed)));
    assert!(matches!(a.close(), Err(SessionError::Closed)));
}

#[tokio::test]
async fn test_close_callback_set_after_close_is_ignored() {
    let (a, _b, _rx) = linked(0);
    a.close().unwrap();
    let calls = counting_close_callback(&a);
    let _ = a.close();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_close_hangs_up_on_peer() {
    // Buffered mode: the write loop owns the writer and is parked on an
    // empty queue. Closing must wake it so the peer sees end-of-stream.
    let (a, b, _rx) = linked(4);
    a.start();
    b.start();
    let b_calls = counting_close_callback(&b);

    a.close().unwrap();

    wait_closed(&b).await;
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_peer_disconnect_closes_session() {
    let (a_conn, b_conn) = Connection::pair().unwrap();
    let ids = SessionIdGenerator::new();
    let a = session(a_conn, &ids, ignore(), 0);
    let calls = counting_close_callback(&a);
    a.start();

    drop(b_conn);

    wait_closed(&a).await;
    assert!(a.is_closed());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =========================================================================
// Send pipeline
// =========================================================================

#[tokio::test]
async fn test_sync_send_round_trip() {
    let (a, b, mut rx) = linked(0);
    a.start();
    b.start();

    a.send(Bytes::from_static(b"hello")).await.unwrap();
    assert_eq!(&recv(&mut rx).await[..], b"hello");
}

#[tokio::test]
async fn test_buffered_send_preserves_fifo_order() {
    let (a, b, mut rx) = linked(256);
    a.start();
    b.start();

    for i in 0..200u32 {
        a.send(Bytes::from(i.to_be_bytes().to_vec())).await.unwrap();
    }
    for i in 0..200u32 {
        assert_eq!(&recv(&mut rx).await[..], &i.to_be_bytes());
    }
}

#[tokio::test]
async fn test_messages_queued_before_start_are_written_in_order() {
    let (a, b, mut rx) = linked(3);
    b.start();

    for text in ["one", "two", "three"] {
        a.send(Bytes::from(text)).await.unwrap();
    }
    a.start();

    for text in ["one", "two", "three"] {
        assert_eq!(&recv(&mut rx).await[..], text.as_bytes());
    }
}

#[tokio::test]
async fn test_full_queue_rejects_and_closes() {
    const CAPACITY: usize = 4;
    let (a, _b, _rx) = linked(CAPACITY);
    let calls = counting_close_callback(&a);

    // Not started, so nothing drains the queue.
    for i in 0..CAPACITY {
        a.send(Bytes::from(vec![i as u8])).await.unwrap();
    }
    let overflow = a.send(Bytes::from_static(b"one too many")).await;

    assert!(matches!(overflow, Err(SessionError::SendQueueSaturated)));
    assert_eq!(a.state(), SessionState::Closed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        a.send(Bytes::from_static(b"late")).await,
        Err(SessionError::Closed)
    ));
}

#[tokio::test]
async fn test_send_after_close_fails_fast_in_both_modes() {
    for queue in [0, 8] {
        let (a, b, _rx) = linked(queue);
        a.start();
        b.start();
        a.close().unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            a.send(Bytes::from_static(b"nope")),
        )
        .await
        .expect("send on a closed session must not block");
        assert!(matches!(result, Err(SessionError::Closed)), "queue size {queue}");
    }
}

#[tokio::test]
async fn test_send_callback_runs_after_each_write() {
    let (a, b, mut rx) = linked(0);
    a.start();
    b.start();

    let sent = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&sent);
    a.set_send_callback(move |_, msg: &Bytes| {
        counter.fetch_add(msg.len(), Ordering::SeqCst);
    });

    for text in ["a", "bb", "ccc"] {
        a.send(Bytes::from(text)).await.unwrap();
    }
    assert_eq!(sent.load(Ordering::SeqCst), 6);
    for _ in 0..3 {
        recv(&mut rx).await;
    }
}

#[tokio::test]
async fn test_encode_failure_closes_session() {
    let (a_conn, _b_conn) = Connection::pair().unwrap();
    let a = Session::new(
        a_conn,
        SessionIdGenerator::new().next_id(),
        Arc::new(LengthDelimited::new().with_max_frame_len(4)),
        ignore(),
        &SessionConfig::default(),
    );
    a.start();

    let result = a.send(Bytes::from_static(b"far too long")).await;
    assert!(matches!(result, Err(SessionError::Encode(_))));
    assert!(a.is_closed());
}

#[tokio::test]
async fn test_buffered_encode_failure_closes_session_from_write_loop() {
    let (a_conn, _b_conn) = Connection::pair().unwrap();
    let a = Session::new(
        a_conn,
        SessionIdGenerator::new().next_id(),
        Arc::new(LengthDelimited::new().with_max_frame_len(4)),
        ignore(),
        &SessionConfig::buffered(4),
    );
    a.start();

    // Accepted by the queue; the failure surfaces in the write loop.
    a.send(Bytes::from_static(b"far too long")).await.unwrap();
    wait_closed(&a).await;
}

/// Length-delimited frames whose `write` flushes the bytes, then parks its
/// worker thread until released. The sender keeps the writer lock the
/// whole time, so a `close` from another thread cannot reach the writer.
struct HeldWrite {
    frames: LengthDelimited,
    written: Mutex<Option<oneshot::Sender<()>>>,
    release: Mutex<std_mpsc::Receiver<()>>,
}

impl Protocol for HeldWrite {
    type Message = Bytes;
    type Error = ProtocolError;

    async fn decode(
        &self,
        reader: &mut ConnectionReader,
        buffer: &mut BytesMut,
    ) -> Result<Option<Bytes>, ProtocolError> {
        self.frames.decode(reader, buffer).await
    }

    fn encode(&self, message: &Bytes) -> Result<Bytes, ProtocolError> {
        self.frames.encode(message)
    }

    async fn write(
        &self,
        writer: &mut ConnectionWriter,
        bytes: &[u8],
    ) -> Result<(), ProtocolError> {
        writer.write_all(bytes).await?;
        writer.flush().await?;
        if let Some(written) = self.written.lock().unwrap().take() {
            let _ = written.send(());
        }
        let _ = self.release.lock().unwrap().recv();
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_during_sync_send_hangs_up_on_peer() {
    let (a_conn, b_conn) = Connection::pair().unwrap();
    let (written_tx, written_rx) = oneshot::channel();
    let (release_tx, release_rx) = std_mpsc::channel();
    let handler: SharedHandler<HeldWrite> =
        Arc::new(handler_fn(|_: &Session<HeldWrite>, _: Bytes| {}));
    let a = Session::new(
        a_conn,
        SessionIdGenerator::new().next_id(),
        Arc::new(HeldWrite {
            frames: LengthDelimited::new(),
            written: Mutex::new(Some(written_tx)),
            release: Mutex::new(release_rx),
        }),
        handler,
        &SessionConfig::default(),
    );

    let sender = a.clone();
    let send = tokio::spawn(async move { sender.send(Bytes::from_static(b"last words")).await });
    written_rx.await.unwrap();

    // The write has finished but the sender still holds the writer.
    a.close().unwrap();
    release_tx.send(()).unwrap();

    assert!(send.await.unwrap().is_ok());
    assert!(a.is_closed());

    // `a` is still alive; only the session teardown can end the stream.
    let (mut b_rd, _b_wr) = b_conn.into_split();
    let mut received = Vec::new();
    tokio::time::timeout(WAIT, b_rd.read_to_end(&mut received))
        .await
        .expect("peer should see end-of-stream")
        .unwrap();
    assert_eq!(&received[4..], b"last words");
}

#[tokio::test]
async fn test_sync_close_between_sends_hangs_up_on_peer() {
    let (a_conn, b_conn) = Connection::pair().unwrap();
    let a = session(a_conn, &SessionIdGenerator::new(), ignore(), 0);

    a.send(Bytes::from_static(b"one")).await.unwrap();
    a.close().unwrap();

    let (mut b_rd, _b_wr) = b_conn.into_split();
    let mut received = Vec::new();
    tokio::time::timeout(WAIT, b_rd.read_to_end(&mut received))
        .await
        .expect("peer should see end-of-stream")
        .unwrap();
    assert_eq!(&received[4..], b"one");
}

// =========================================================================
// Read loop
// =========================================================================

#[tokio::test]
async fn test_partial_frames_are_carried_across_reads() {
    let (a_conn, b_conn) = Connection::pair().unwrap();
    let (handler, mut rx) = collector();
    let a = session(a_conn, &SessionIdGenerator::new(), handler, 0);
    a.start();

    let (_b_rd, mut b_wr): (_, ConnectionWriter) = b_conn.into_split();
    let wire = LengthDelimited::new()
        .encode(&Bytes::from_static(b"stitched together"))
        .unwrap();
    for chunk in wire.chunks(3) {
        b_wr.write_all(chunk).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert_eq!(&recv(&mut rx).await[..], b"stitched together");
    assert!(!a.is_closed());
}

#[tokio::test]
async fn test_malformed_input_closes_session() {
    let (a_conn, b_conn) = Connection::pair().unwrap();
    let a = Session::new(
        a_conn,
        SessionIdGenerator::new().next_id(),
        Arc::new(LengthDelimited::new().with_max_frame_len(16)),
        ignore(),
        &SessionConfig::default(),
    );
    a.start();

    let (_b_rd, mut b_wr) = b_conn.into_split();
    // Declares a 4 GiB frame.
    b_wr.write_all(&[0xff, 0xff, 0xff, 0xff]).await.unwrap();

    wait_closed(&a).await;
}

struct PanicOnBoom(mpsc::UnboundedSender<Bytes>);

impl Handler<LengthDelimited> for PanicOnBoom {
    async fn handle(&self, _session: &Session<LengthDelimited>, message: Bytes) {
        if &message[..] == b"boom" {
            panic!("handler exploded");
        }
        let _ = self.0.send(message);
    }
}

#[tokio::test]
async fn test_handler_panic_is_contained() {
    let (a_conn, b_conn) = Connection::pair().unwrap();
    let ids = SessionIdGenerator::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let a = session(a_conn, &ids, ignore(), 0);
    let b = session(b_conn, &ids, Arc::new(PanicOnBoom(tx)), 0);
    a.start();
    b.start();

    a.send(Bytes::from_static(b"boom")).await.unwrap();
    a.send(Bytes::from_static(b"still here")).await.unwrap();

    assert_eq!(&recv(&mut rx).await[..], b"still here");
    assert!(!b.is_closed());
}

#[tokio::test]
async fn test_closure_handler_panic_is_contained() {
    let (a_conn, b_conn) = Connection::pair().unwrap();
    let ids = SessionIdGenerator::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let handler = handler_fn(move |_: &Session<LengthDelimited>, msg: Bytes| {
        assert_ne!(&msg[..], b"boom");
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let a = session(a_conn, &ids, ignore(), 0);
    let b = session(b_conn, &ids, Arc::new(handler), 0);
    a.start();
    b.start();

    a.send(Bytes::from_static(b"boom")).await.unwrap();
    a.send(Bytes::from_static(b"fine")).await.unwrap();

    tokio::time::timeout(WAIT, async {
        while seen.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("second message should be handled");
    assert!(!b.is_closed());
}

/// Replies to every message through the session it arrived on.
struct Echo;

impl Handler<LengthDelimited> for Echo {
    async fn handle(&self, session: &Session<LengthDelimited>, message: Bytes) {
        let _ = session.send(message).await;
    }
}

#[tokio::test]
async fn test_handler_can_reply_on_its_own_session() {
    let (a_conn, b_conn) = Connection::pair().unwrap();
    let ids = SessionIdGenerator::new();
    let (handler, mut rx) = collector();
    let client = session(a_conn, &ids, handler, 0);
    let server = session(b_conn, &ids, Arc::new(Echo), 16);
    client.start();
    server.start();

    client.send(Bytes::from_static(b"ping")).await.unwrap();
    assert_eq!(&recv(&mut rx).await[..], b"ping");
}
