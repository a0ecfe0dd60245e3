//! Session module - Drives the interactive turn loop
//!
//! One turn: parse a line, encode it from the current position, exchange
//! the frame with the drone, decode the reply and reconcile it into the
//! client state. Every failure inside a turn is reported and the loop
//! carries on.

mod state;

pub use state::*;

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::link::{LinkError, Transport};
use crate::protocol::{self, Broadcasts, Command, DecodeError, ParseError};

/// Line that ends the session
pub const QUIT: &str = "quit";

/// Prompt shown before each line of input
pub const PROMPT: &str = "input operation > ";

const RULE: &str = "------------------------";

/// Errors that end a turn early
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("Malformed reply: {0}")]
    Decode(#[from] DecodeError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("{0}")]
    State(#[from] StateError),
}

pub type TurnResult<T> = Result<T, TurnError>;

/// Help line listing the accepted commands
pub fn banner() -> String {
    Command::ALL
        .iter()
        .map(|c| format!("{}({})", c, c.label()))
        .collect::<Vec<_>>()
        .join(",")
}

/// An interactive client session
pub struct Session<T: Transport> {
    transport: T,
    reconciler: Reconciler,
    reply_timeout: Duration,
    show_banner: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, reply_timeout: Duration) -> Self {
        Self {
            transport,
            reconciler: Reconciler::new(),
            reply_timeout,
            show_banner: true,
        }
    }

    pub fn with_banner(mut self, show: bool) -> Self {
        self.show_banner = show;
        self
    }

    pub fn state(&self) -> &ClientState {
        self.reconciler.state()
    }

    /// Run a single turn for one line of input
    pub async fn turn(&mut self, line: &str) -> TurnResult<TurnOutcome> {
        let command = protocol::parse(line)?;
        let request = protocol::encode(command, self.state().position);
        tracing::debug!(
            "Request {} from {}: {:02x?}",
            command,
            self.state().position,
            &request[..]
        );

        self.reconciler.begin(command)?;
        let reply = match self.transport.exchange(&request, self.reply_timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                self.reconciler.abort();
                return Err(e.into());
            }
        };

        let Some(bytes) = reply else {
            return Ok(self.reconciler.on_timeout()?);
        };

        match protocol::decode(&bytes) {
            Ok(frame) => Ok(self.reconciler.on_reply(&frame)?),
            Err(e) => {
                self.reconciler.abort();
                Err(e.into())
            }
        }
    }

    /// Read lines from `input` until `quit` or end of input
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        tracing::info!("Session started at {}", self.state().position);

        loop {
            if self.show_banner {
                output.write_all(format!("{}\n", banner()).as_bytes()).await?;
            }
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            if line.trim() == QUIT {
                break;
            }

            output.write_all(format!("{line}\n").as_bytes()).await?;
            output.flush().await?;

            let text = match self.turn(&line).await {
                Ok(outcome) => format!("{RULE}\n{outcome}\n"),
                Err(e) => {
                    tracing::warn!("Turn failed: {}", e);
                    format!("{e}\n")
                }
            };
            output.write_all(text.as_bytes()).await?;
        }

        output.flush().await?;
        tracing::info!("Session ended at {}", self.state().position);
        Ok(())
    }
}

fn write_broadcasts(f: &mut fmt::Formatter<'_>, broadcasts: &Broadcasts) -> fmt::Result {
    for (slot, position) in broadcasts.iter().enumerate() {
        if let Some(position) = position {
            writeln!(f, "drone {} broadcasting location:", slot)?;
            writeln!(f, " {}", position)?;
            writeln!(f)?;
        }
    }
    Ok(())
}

impl fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnOutcome::Accepted {
                position,
                broadcasts,
            } => {
                write_broadcasts(f, broadcasts)?;
                writeln!(f, "Command accepted")?;
                writeln!(f, "New position: {}", position)?;
                write!(f, "{RULE}")
            }
            TurnOutcome::Rejected {
                reason,
                position,
                broadcasts,
            } => {
                write_broadcasts(f, broadcasts)?;
                writeln!(f, "Command rejected")?;
                writeln!(f, "{}", reason)?;
                writeln!(f, "Current position: {}", position)?;
                write!(f, "{RULE}")
            }
            TurnOutcome::NoResponse => write!(f, "Didn't receive response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkResult;
    use crate::protocol::{Direction, DroneFrame, Outcome, Position, RejectReason, DRONE_SLOTS};
    use async_trait::async_trait;
    use bytes::BytesMut;
    use std::collections::VecDeque;
    use tokio::io::{AsyncReadExt, BufReader};
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    /// Replays canned replies and records what was sent
    #[derive(Default)]
    struct ScriptedTransport {
        replies: VecDeque<LinkResult<Option<Vec<u8>>>>,
        sent: Vec<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn reply(mut self, frame: &DroneFrame) -> Self {
            let mut buf = BytesMut::new();
            frame.encode_into(&mut buf);
            self.replies.push_back(Ok(Some(buf.to_vec())));
            self
        }

        fn silence(mut self) -> Self {
            self.replies.push_back(Ok(None));
            self
        }

        fn raw(mut self, bytes: Vec<u8>) -> Self {
            self.replies.push_back(Ok(Some(bytes)));
            self
        }

        fn fault(mut self) -> Self {
            self.replies.push_back(Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "operation not permitted",
            ))));
            self
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn exchange(
            &mut self,
            frame: &[u8],
            _timeout: Duration,
        ) -> LinkResult<Option<Vec<u8>>> {
            self.sent.push(frame.to_vec());
            self.replies.pop_front().unwrap_or(Ok(None))
        }
    }

    /// Holds every exchange until the gate is opened, then times out
    struct GatedTransport {
        gate: Option<oneshot::Receiver<()>>,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn exchange(
            &mut self,
            _frame: &[u8],
            _timeout: Duration,
        ) -> LinkResult<Option<Vec<u8>>> {
            if let Some(gate) = self.gate.take() {
                let _ = gate.await;
            }
            Ok(None)
        }
    }

    fn session(transport: ScriptedTransport) -> Session<ScriptedTransport> {
        Session::new(transport, Duration::from_millis(10))
    }

    #[test]
    fn test_banner() {
        assert_eq!(
            banner(),
            "F(forward),B(backward),R(rightward),L(leftward),Q(broadcast location)"
        );
    }

    #[tokio::test]
    async fn test_forward_accepted() {
        let reply = DroneFrame::request(Command::Move(Direction::Forward), Position::new(1, 0));
        let mut session = session(ScriptedTransport::default().reply(&reply));

        let outcome = assert_ok!(session.turn("F").await);

        let sent = &session.transport.sent[0];
        assert_eq!(sent[3], b'F');
        assert_eq!(&sent[4..12], &[0; 8]);
        assert!(matches!(outcome, TurnOutcome::Accepted { .. }));
        assert_eq!(session.state().position, Position::new(1, 0));
        assert_eq!(session.state().last_reject, None);
    }

    #[tokio::test]
    async fn test_query_rejected_with_broadcast() {
        let reply = DroneFrame {
            op: Command::BroadcastRequest,
            position: Position::new(8, 8),
            outcome: Outcome::Rejected,
            drone_id: 1,
            reject_reason: RejectReason::BlockedByPeer,
            broadcasts: [Some(Position::new(5, 5)), None, None],
        };
        let mut session = session(ScriptedTransport::default().reply(&reply));

        let outcome = assert_ok!(session.turn("Q").await);

        assert_eq!(
            outcome,
            TurnOutcome::Rejected {
                reason: RejectReason::BlockedByPeer,
                position: Position::ORIGIN,
                broadcasts: [Some(Position::new(5, 5)), None, None],
            }
        );
        assert_eq!(session.state().position, Position::ORIGIN);
        assert_eq!(session.state().last_reject, Some(RejectReason::BlockedByPeer));
        assert_eq!(session.state().peers, [Some(Position::new(5, 5)), None, None]);
    }

    #[tokio::test]
    async fn test_bad_command_sends_nothing() {
        let mut session = session(ScriptedTransport::default());

        let err = assert_err!(session.turn("Z").await);

        assert!(matches!(err, TurnError::Parse(ParseError::Op)));
        assert!(session.transport.sent.is_empty());
        assert_eq!(session.reconciler.phase(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn test_timeout_is_no_response() {
        let mut session = session(ScriptedTransport::default().silence());

        let outcome = assert_ok!(session.turn("B").await);

        assert_eq!(outcome, TurnOutcome::NoResponse);
        assert_eq!(session.state(), &ClientState::default());
        assert_eq!(session.reconciler.phase(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn test_request_carries_current_position() {
        let moved = DroneFrame::request(Command::Move(Direction::Right), Position::new(2, -3));
        let mut session = session(ScriptedTransport::default().reply(&moved).silence());

        assert_ok!(session.turn("R").await);
        assert_ok!(session.turn("L").await);

        let second = &session.transport.sent[1];
        assert_eq!(&second[4..8], &2i32.to_be_bytes());
        assert_eq!(&second[8..12], &(-3i32).to_be_bytes());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_recoverable() {
        let mut session = session(ScriptedTransport::default().raw(vec![b'P', b'4', 0x01]));

        let err = assert_err!(session.turn("F").await);
        assert!(matches!(err, TurnError::Decode(DecodeError::Truncated { .. })));
        assert_eq!(session.reconciler.phase(), TurnPhase::Idle);

        // the next turn proceeds normally
        assert_ok!(session.turn("F").await);
    }

    #[tokio::test]
    async fn test_link_fault_is_recoverable() {
        let mut session = session(ScriptedTransport::default().fault());

        let err = assert_err!(session.turn("F").await);
        assert!(matches!(err, TurnError::Link(_)));
        assert_eq!(session.reconciler.phase(), TurnPhase::Idle);
        assert_eq!(session.state().position, Position::ORIGIN);
    }

    #[tokio::test]
    async fn test_run_loop() {
        let accepted = DroneFrame::request(Command::Move(Direction::Forward), Position::new(1, 0));
        let transport = ScriptedTransport::default().reply(&accepted).silence();
        let mut session = session(transport);
        let input = BufReader::new(&b"F\nZ\nL\nquit\nF\n"[..]);
        let mut output = Vec::new();

        session.run(input, &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Command accepted\nNew position: (1, 0)"));
        assert!(text.contains("Expected command 'F', 'B', 'L', 'R', or 'Q'."));
        assert!(text.contains("Didn't receive response"));
        assert_eq!(text.matches(PROMPT).count(), 4);
        assert_eq!(session.transport.sent.len(), 2);
        assert_eq!(session.state().position, Position::new(1, 0));
    }

    #[tokio::test]
    async fn test_input_echoed_before_reply_arrives() {
        let (open_gate, gate) = oneshot::channel();
        let mut session = Session::new(GatedTransport { gate: Some(gate) }, Duration::from_secs(5))
            .with_banner(false);
        let (writer, mut reader) = tokio::io::duplex(4096);
        let input = BufReader::new(&b"F\nquit\n"[..]);

        let operator = async {
            let mut seen = Vec::new();
            let mut chunk = [0u8; 256];
            // the exchange is still pending, so the echo must already be visible
            while !String::from_utf8_lossy(&seen).contains("> F\n") {
                let n = reader.read(&mut chunk).await.unwrap();
                assert!(n > 0, "output closed before the line was echoed");
                seen.extend_from_slice(&chunk[..n]);
            }
            open_gate.send(()).unwrap();
        };

        let (result, ()) = tokio::time::timeout(
            Duration::from_secs(2),
            async { tokio::join!(session.run(input, writer), operator) },
        )
        .await
        .expect("echo was held back until the exchange finished");
        result.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_at_end_of_input() {
        let mut session = session(ScriptedTransport::default()).with_banner(false);
        let mut output = Vec::new();

        session.run(BufReader::new(&b""[..]), &mut output).await.unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), PROMPT);
    }

    #[test]
    fn test_outcome_display() {
        let rejected = TurnOutcome::Rejected {
            reason: RejectReason::OutOfBounds,
            position: Position::new(0, 0),
            broadcasts: [None, None, Some(Position::new(4, 1))],
        };
        let text = rejected.to_string();
        assert!(text.starts_with("drone 2 broadcasting location:\n (4, 1)\n"));
        assert!(text.contains(
            "Command rejected\nout of bound of the map\nCurrent position: (0, 0)"
        ));

        let accepted = TurnOutcome::Accepted {
            position: Position::new(3, 1),
            broadcasts: [None; DRONE_SLOTS],
        };
        assert!(accepted.to_string().starts_with("Command accepted\nNew position: (3, 1)"));
    }
}
