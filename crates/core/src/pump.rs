//! Stream Pump (§4.5): reads one direction of a connection, frames RESP
//! messages, consults the matcher, and drives the Fault Applier.

use std::sync::Arc;

use rfault_helpers::rng::PercentGate;
use tokio::net::TcpStream;
use tracing::{trace, warn};

use crate::applier::{self, ApplyOptions};
use crate::errors::{ConnectionError, Side};
use crate::plan::{Direction, MsgOrdering, Plan, RuleSnapshot};
use crate::resp::{self, FrameOutcome};
use crate::sockutil;

const READ_CHUNK: usize = 4096;

/// `src` for a request pump is the client socket; for a response pump it is
/// the upstream socket (§4.5) — this maps the pump's direction to the side
/// an error on `src` actually occurred on.
fn side_of(direction: Direction) -> Side {
    match direction {
        Direction::Request => Side::Client,
        Direction::Response => Side::Upstream,
    }
}

/// A message paired with the rule (if any) that matched it, ready to hand
/// to the applier.
struct Pending {
    message: resp::Message,
    rule: Option<RuleSnapshot>,
}

/// Runs one direction's pump until its source hits EOF, a framing error
/// occurs, or a `drop` rule closes the source.
///
/// `client_addr` is always the *client's* remote address, even for the
/// response pump (§4.5) — it is the key both directions use to look up
/// `clientName`/`clientAddr` predicates and the `CLIENT SETNAME` table.
pub async fn run(
    direction: Direction,
    src: Arc<TcpStream>,
    dst: Arc<TcpStream>,
    client_addr: String,
    plan: Arc<Plan>,
    gate: Arc<dyn PercentGate>,
    apply_opts: ApplyOptions,
) {
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);

    loop {
        let pending = match frame_and_match(&mut buf, direction, &client_addr, &plan, &*gate) {
            Ok(pending) => pending,
            Err(err) => {
                let err = ConnectionError::Frame {
                    side: side_of(direction),
                    source: err,
                };
                warn!(?direction, error = %err, "malformed RESP stream, terminating pump");
                return;
            }
        };

        for item in pending {
            let dropped = dispatch(item, &src, &dst, plan.ordering(), apply_opts).await;
            if dropped {
                return;
            }
        }

        let mut chunk = [0u8; READ_CHUNK];
        let n = match sockutil::read_some(&src, &mut chunk).await {
            Ok(0) => {
                trace!(?direction, "source reached EOF");
                return;
            }
            Ok(n) => n,
            Err(err) => {
                let err = ConnectionError::Io {
                    side: side_of(direction),
                    source: err,
                };
                warn!(?direction, error = %err, "read error, terminating pump (permissive)");
                return;
            }
        };
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Frames every complete message currently at the front of `buf`, matching
/// each against the plan as it goes, and leaves any trailing partial frame
/// untouched in `buf` for the next read (§4.1).
fn frame_and_match(
    buf: &mut Vec<u8>,
    direction: Direction,
    client_addr: &str,
    plan: &Plan,
    gate: &dyn PercentGate,
) -> Result<Vec<Pending>, resp::FrameError> {
    let mut pending = Vec::new();
    let mut offset = 0;

    loop {
        match resp::frame(&buf[offset..])? {
            FrameOutcome::Incomplete => break,
            FrameOutcome::Complete { consumed, message } => {
                offset += consumed;

                if direction == Direction::Request {
                    plan.handle_client_setname(client_addr, &message);
                }
                let rule =
                    plan.select_rule(direction, client_addr, &message.value, &message.raw, gate);
                pending.push(Pending { message, rule });
            }
        }
    }

    buf.drain(..offset);
    Ok(pending)
}

/// Dispatches one matched frame per the plan's ordering mode (§5).
///
/// Returns `true` if the source was closed by a `drop` rule, signalling the
/// caller to stop pumping.
async fn dispatch(
    pending: Pending,
    src: &Arc<TcpStream>,
    dst: &Arc<TcpStream>,
    ordering: MsgOrdering,
    apply_opts: ApplyOptions,
) -> bool {
    let spawn_detached = match ordering {
        MsgOrdering::Ordered => false,
        MsgOrdering::Unordered => true,
        MsgOrdering::UnorderedDelays => {
            pending.rule.as_ref().map(|r| r.delay_ms > 0).unwrap_or(false)
        }
    };

    if spawn_detached {
        let src = Arc::clone(src);
        let dst = Arc::clone(dst);
        tokio::spawn(async move {
            applier::apply(&pending.message, pending.rule.as_ref(), &src, &dst, apply_opts).await;
        });
        false
    } else {
        applier::apply(&pending.message, pending.rule.as_ref(), src, dst, apply_opts).await
    }
}
