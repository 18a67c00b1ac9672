//! Fault Applier (§4.4): executes the side effect a matched rule calls for.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::plan::RuleSnapshot;
use crate::resp::Message;
use crate::sockutil;

/// Controls whether an injected reply (`returnEmpty`/`returnErr`) is
/// followed by forwarding the original frame, or suppresses it (§9,
/// "injection plus forward").
#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    pub inject_then_forward: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        ApplyOptions {
            inject_then_forward: true,
        }
    }
}

/// Applies `rule` (if any) to `msg`, forwarding bytes from `src` to `dst` as
/// directed. A `None` rule behaves like a rule with no effects: the frame
/// is passed through verbatim.
///
/// Returns `true` if `src` was closed (the `drop` effect fired) — callers
/// use this to stop pumping that direction without waiting on a read that
/// will now never complete with data.
pub async fn apply(
    msg: &Message,
    rule: Option<&RuleSnapshot>,
    src: &Arc<TcpStream>,
    dst: &Arc<TcpStream>,
    opts: ApplyOptions,
) -> bool {
    if let Some(rule) = rule {
        if rule.delay_ms > 0 {
            if rule.log {
                debug!(rule = %rule.name, delay_ms = rule.delay_ms, "delaying frame");
            }
            tokio::time::sleep(Duration::from_millis(rule.delay_ms)).await;
        }

        if rule.drop {
            if rule.log {
                debug!(rule = %rule.name, "dropping connection");
            }
            if let Err(err) = sockutil::shutdown_both(src) {
                warn!(error = %err, "closing source socket failed");
            }
            return true;
        }

        if rule.return_empty {
            if rule.log {
                debug!(rule = %rule.name, "injecting empty reply");
            }
            write_ignoring_errors(dst, b"$-1\r\n").await;
            if opts.inject_then_forward {
                write_ignoring_errors(dst, &msg.raw).await;
            }
            return false;
        }

        if !rule.return_err.is_empty() {
            if rule.log {
                debug!(rule = %rule.name, "injecting error reply");
            }
            let sanitized = sanitize_error_text(&rule.return_err);
            let mut frame = Vec::with_capacity(sanitized.len() + 3);
            frame.push(b'-');
            frame.extend_from_slice(sanitized.as_bytes());
            frame.extend_from_slice(b"\r\n");
            write_ignoring_errors(dst, &frame).await;
            if opts.inject_then_forward {
                write_ignoring_errors(dst, &msg.raw).await;
            }
            return false;
        }
    }

    write_ignoring_errors(dst, &msg.raw).await;
    false
}

/// `returnErr` text cannot itself contain `\r`/`\n` — the framer has no way
/// to recover a multi-line simple error frame (§6).
fn sanitize_error_text(text: &str) -> String {
    text.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

async fn write_ignoring_errors(dst: &Arc<TcpStream>, data: &[u8]) {
    if let Err(err) = sockutil::write_all(dst, data).await {
        warn!(error = %err, "write to destination socket failed");
    }
}
