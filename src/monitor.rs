/// The liveness monitor: consumes frames from the subject, tracks the time
/// since the last heartbeat, and decides when (and why) the daemon dies.
///
/// The loop is strictly sequential. Each iteration waits for either the next
/// decode result or the poll interval, re-checks the heartbeat deadline with
/// a fresh clock reading, and only then dispatches on the frame. The poll
/// interval guarantees the deadline check runs even when the subject goes
/// completely silent.
use crate::clock::Clock;
use crate::protocol::{self, CodecError, Decoded, Message, Op};
use crate::registry::CommandRegistry;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Why the monitor stopped. Produced exactly once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// No heartbeat within the configured window.
    Timeout,
    /// The subject closed its end of the channel.
    ChannelClosed,
    /// A read or write on the channel failed.
    TransportError,
    /// The subject asked for a clean shutdown.
    ShutdownRequested,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminationReason::Timeout => "heartbeat timeout",
            TerminationReason::ChannelClosed => "channel closed",
            TerminationReason::TransportError => "transport error",
            TerminationReason::ShutdownRequested => "shutdown requested",
        };
        f.write_str(label)
    }
}

/// Source of decode results for the monitor. The monitor never touches the
/// transport directly, so tests can script arbitrary frame sequences.
///
/// Implementations must make `next_frame` safe to drop at an await point
/// without losing a frame: the monitor races it against the poll timer.
pub trait FrameSource {
    async fn next_frame(&mut self) -> Result<Decoded, CodecError>;
}

/// Production frame source: a background task owns the read half and runs the
/// blocking decode, handing each result to the monitor over a single-slot
/// channel. Cancelling the receive side mid-wait cannot corrupt a frame
/// because the decode itself is never cancelled. The task does not interpret
/// protocol content; it is pure hand-off.
pub struct SpawnedReader {
    rx: mpsc::Receiver<Result<Decoded, CodecError>>,
}

impl SpawnedReader {
    pub fn spawn<R>(mut stream: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            loop {
                let item = protocol::read_frame(&mut stream).await;
                let done = matches!(item, Ok(Decoded::Eof) | Err(_));
                if tx.send(item).await.is_err() {
                    // Monitor is gone; nothing left to hand off to.
                    break;
                }
                if done {
                    break;
                }
            }
        });
        Self { rx }
    }
}

impl FrameSource for SpawnedReader {
    async fn next_frame(&mut self) -> Result<Decoded, CodecError> {
        match self.rx.recv().await {
            Some(item) => item,
            // Reader task ended; anything after its final item is end of stream.
            None => Ok(Decoded::Eof),
        }
    }
}

/// The monitor loop. `run` consumes frames until a terminal condition and
/// returns the reason; the caller hands that to the recovery executor.
pub struct Monitor<S, W, C> {
    source: S,
    writer: W,
    clock: C,
    heartbeat_timeout_secs: u64,
    poll_interval: Duration,
    on_heartbeat: Option<Box<dyn FnMut() + Send>>,
}

impl<S, W, C> Monitor<S, W, C>
where
    S: FrameSource,
    W: AsyncWrite + Unpin,
    C: Clock,
{
    pub fn new(
        source: S,
        writer: W,
        clock: C,
        heartbeat_timeout_secs: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            writer,
            clock,
            heartbeat_timeout_secs,
            poll_interval,
            on_heartbeat: None,
        }
    }

    /// Install a hook invoked on every received heartbeat, e.g. to reset an
    /// external hardware watchdog.
    pub fn with_heartbeat_hook(mut self, hook: Box<dyn FnMut() + Send>) -> Self {
        self.on_heartbeat = Some(hook);
        self
    }

    pub async fn run(&mut self, registry: &mut CommandRegistry) -> TerminationReason {
        // Announce readiness before anything else.
        if let Err(e) = protocol::write_frame(&mut self.writer, &Message::new(Op::Ack)).await {
            error!(error = %e, "failed to send startup ack");
            return TerminationReason::TransportError;
        }
        let mut last_heartbeat = self.clock.now();
        debug!(
            timeout_secs = self.heartbeat_timeout_secs,
            poll_secs = self.poll_interval.as_secs(),
            "monitor running"
        );

        loop {
            let event = tokio::time::timeout(self.poll_interval, self.source.next_frame()).await;

            // Deadline check comes first, on a fresh reading, whether or not
            // a frame arrived. A heartbeat that shows up after the deadline
            // has already passed does not save the subject.
            let now = self.clock.now();
            let elapsed = now.saturating_sub(last_heartbeat);
            if elapsed > self.heartbeat_timeout_secs {
                error!(
                    elapsed_secs = elapsed,
                    timeout_secs = self.heartbeat_timeout_secs,
                    "heartbeat timed out"
                );
                return TerminationReason::Timeout;
            }

            let decoded = match event {
                // Poll interval expired with no frame; go wait again.
                Err(_) => continue,
                Ok(Err(e)) if e.is_framing() => {
                    warn!(error = %e, "ignoring malformed frame");
                    continue;
                }
                Ok(Err(e)) => {
                    error!(error = %e, "transport failure reading frame");
                    return TerminationReason::TransportError;
                }
                Ok(Ok(decoded)) => decoded,
            };

            match decoded {
                Decoded::Eof => {
                    info!("subject closed the channel");
                    return TerminationReason::ChannelClosed;
                }
                Decoded::Empty => {
                    debug!("empty frame, ignoring");
                }
                Decoded::Oversized { consumed } => {
                    warn!(consumed, "oversized frame drained and ignored");
                }
                Decoded::Frame { message, consumed } => {
                    debug!(consumed, op = message.op, "frame received");
                    if let Some(reason) =
                        self.dispatch(message, &mut last_heartbeat, registry).await
                    {
                        return reason;
                    }
                }
            }
        }
    }

    /// Handle one decoded message. Returns a reason only on terminal ops or
    /// reply-write failure.
    async fn dispatch(
        &mut self,
        message: Message,
        last_heartbeat: &mut u64,
        registry: &mut CommandRegistry,
    ) -> Option<TerminationReason> {
        match message.op() {
            Some(Op::Heartbeat) => {
                *last_heartbeat = self.clock.now();
                debug!(at_secs = *last_heartbeat, "heartbeat");
                if let Some(hook) = self.on_heartbeat.as_mut() {
                    hook();
                }
                None
            }
            Some(Op::Shutdown) => {
                info!("subject requested shutdown");
                Some(TerminationReason::ShutdownRequested)
            }
            Some(Op::SetCommand) => {
                let command = command_text(&message.payload);
                info!(command = %command, "override recovery command installed");
                registry.set(command);
                self.reply(Message::new(Op::Ack)).await
            }
            Some(Op::ClearCommand) => {
                info!("override recovery command cleared");
                registry.clear();
                self.reply(Message::new(Op::Ack)).await
            }
            Some(Op::GetCommand) => {
                let command = registry.effective();
                debug!(command = %command, "command query");
                self.reply(Message::with_payload(Op::CommandReply, command.into_bytes()))
                    .await
            }
            // Only the daemon emits Ack/CommandReply; tolerate echoes, and
            // ignore ops from the future.
            Some(Op::Ack) | Some(Op::CommandReply) | None => {
                debug!(op = message.op, "ignoring unexpected op");
                None
            }
        }
    }

    async fn reply(&mut self, message: Message) -> Option<TerminationReason> {
        match protocol::write_frame(&mut self.writer, &message).await {
            Ok(()) => None,
            Err(CodecError::PayloadTooLarge { len }) => {
                // Can only happen when an environment-supplied command is
                // absurdly long; drop the reply rather than the daemon.
                warn!(len, "reply payload too large, not sent");
                None
            }
            Err(e) => {
                error!(error = %e, "failed to write reply");
                Some(TerminationReason::TransportError)
            }
        }
    }
}

/// Payload bytes of a SetCommand as command text. The subject may send a
/// C-style NUL terminator; strip it.
fn command_text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .trim_end_matches('\0')
        .to_string()
}
