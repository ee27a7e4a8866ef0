use crate::error::RjlsError;
use crate::logger::DecisionRecord;
use crate::metrics::{counters, histograms};
use crate::registry::{ConnId, Registration};
use crate::server::ServerState;
use futures_util::{SinkExt, StreamExt};
use rjl_common::types::ACK_ACCEPTED;
use rjl_common::{CodecError, Frame, FrameCodec};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type FrameRecv = FramedRead<OwnedReadHalf, FrameCodec>;
type FrameSink = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Lifecycle phase of a relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Sending the initial snapshot.
    Joining,
    /// Relaying broadcasts out and reports in.
    Active,
    /// Terminal. Unregistered and released.
    Closed,
}

/// Per-connection state: identity, phase, and the registry entry whose
/// release marks the `Closed` transition.
struct Session {
    peer: SocketAddr,
    phase: Phase,
    registration: Registration,
    closed: CancellationToken,
    write_deadline: Duration,
}

impl Session {
    fn id(&self) -> ConnId {
        self.registration.id()
    }

    fn activate(&mut self) {
        debug_assert_eq!(self.phase, Phase::Joining);
        self.phase = Phase::Active;
        info!(conn_id = %self.id(), peer = %self.peer, "connection active");
    }

    /// Enter `Closed`. Returns `false` if already closed.
    fn close(&mut self) -> bool {
        if self.phase == Phase::Closed {
            return false;
        }
        self.phase = Phase::Closed;
        self.registration.unregister();
        true
    }

    /// Write one frame, bounded by the write deadline and cut short if the
    /// registry drops this connection.
    async fn send(&self, sink: &mut FrameSink, frame: Frame) -> Result<(), RjlsError> {
        let start = Instant::now();
        tokio::select! {
            result = timeout(self.write_deadline, sink.send(frame)) => match result {
                Ok(Ok(())) => {
                    histograms::write_latency_seconds(start.elapsed().as_secs_f64());
                    Ok(())
                }
                Ok(Err(CodecError::Frame(e))) => {
                    warn!(conn_id = %self.id(), error = %e, "skipping unencodable frame");
                    Ok(())
                }
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(RjlsError::WriteTimeout(self.write_deadline)),
            },
            () = self.closed.cancelled() => Err(RjlsError::Evicted),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drive one accepted connection through `Joining -> Active -> Closed`.
///
/// # Errors
///
/// Returns the transport error, write timeout, or eviction that ended the
/// connection. A clean remote close returns `Ok(())`.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), RjlsError> {
    let (read_half, write_half) = stream.into_split();
    let mut frame_rx = FramedRead::new(read_half, FrameCodec::with_max_line(state.config.max_line));
    let mut frame_tx = FramedWrite::new(write_half, FrameCodec::new());

    let (registration, snapshot) = state.store.subscribe(peer);
    if state.shutdown.is_cancelled() {
        return Err(RjlsError::Evicted);
    }
    let mut session = Session {
        peer,
        phase: Phase::Joining,
        closed: registration.closed_token(),
        registration,
        write_deadline: state.config.write_deadline(),
    };
    debug!(conn_id = %session.id(), %peer, hosts = snapshot.len(), "sending snapshot");

    let result = run_session(&mut session, snapshot, &mut frame_rx, &mut frame_tx, &state).await;

    session.close();
    match &result {
        Ok(()) => info!(conn_id = %session.id(), %peer, "connection closed"),
        Err(e) => info!(conn_id = %session.id(), %peer, error = %e, "connection closed"),
    }
    result
}

async fn run_session(
    session: &mut Session,
    snapshot: Vec<String>,
    frame_rx: &mut FrameRecv,
    frame_tx: &mut FrameSink,
    state: &ServerState,
) -> Result<(), RjlsError> {
    // one ADD per host; clients are not expected to acknowledge them
    for host in snapshot {
        session.send(frame_tx, Frame::add(host)).await?;
    }
    session.activate();
    run_message_loop(session, frame_rx, frame_tx, state).await
}

/// Multiplex queued broadcasts out and client frames in until the
/// connection ends.
async fn run_message_loop(
    session: &mut Session,
    frame_rx: &mut FrameRecv,
    frame_tx: &mut FrameSink,
    state: &ServerState,
) -> Result<(), RjlsError> {
    let closed = session.closed.clone();
    loop {
        tokio::select! {
            () = closed.cancelled() => return Err(RjlsError::Evicted),
            item = frame_rx.next() => match item {
                Some(Ok(Ok(frame))) => process_frame(frame, session, frame_tx, state).await?,
                Some(Ok(Err(e))) => {
                    counters::protocol_errors_total();
                    warn!(conn_id = %session.id(), error = %e, "dropping malformed frame");
                }
                Some(Err(CodecError::Io(e))) => return Err(RjlsError::Io(e)),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            },
            queued = session.registration.recv() => match queued {
                Some(frame) => session.send(frame_tx, frame).await?,
                None => return Err(RjlsError::Evicted),
            },
        }
    }
}

async fn process_frame(
    frame: Frame,
    session: &Session,
    frame_tx: &mut FrameSink,
    state: &ServerState,
) -> Result<(), RjlsError> {
    match frame {
        Frame::Report { from, to, rejected } => {
            let record = DecisionRecord::new(from, to, rejected);
            if record.rejected {
                warn!(from = %record.from, to = %record.to, "REJECT");
            } else {
                info!(from = %record.from, to = %record.to, "PERMIT");
            }
            counters::decisions_total(record.verdict());

            if let Err(e) = state.logger.log(&record).await {
                counters::log_write_failures_total();
                error!(
                    conn_id = %session.id(),
                    path = %state.logger.path().display(),
                    error = %e,
                    "failed to append decision"
                );
            }
            session.send(frame_tx, Frame::ack(ACK_ACCEPTED)).await?;
        }
        other => {
            debug!(
                conn_id = %session.id(),
                kind = %other.kind(),
                "ignoring client frame"
            );
        }
    }

    Ok(())
}
