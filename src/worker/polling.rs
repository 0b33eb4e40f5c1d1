use ibdesk_gateway::{
    Gateway, GatewayError, GatewayOrderStatus, LogEntry, Severity, StatusSnapshot,
    SubmissionHandle,
};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// How polling a submitted order ended.
#[derive(Debug)]
pub(super) enum Verdict {
    Accepted {
        status: GatewayOrderStatus,
        snapshot: StatusSnapshot,
    },
    Rejected {
        status: GatewayOrderStatus,
        snapshot: StatusSnapshot,
    },
    /// The order stays live at the gateway.
    TimedOut {
        ticks: u32,
        last: Option<StatusSnapshot>,
    },
    Faulted {
        error: GatewayError,
        last: Option<StatusSnapshot>,
    },
}

/// Polls once per `interval` until the gateway reports an accepted or rejected
/// status, or until `timeout` has elapsed since `submitted_at`. Never cancels.
pub(super) async fn poll_until_settled<G: Gateway>(
    gateway: &mut G,
    handle: &SubmissionHandle,
    submitted_at: Instant,
    timeout: Duration,
    interval: Duration,
) -> Verdict {
    let mut tick = 0_u32;
    let mut last: Option<StatusSnapshot> = None;
    let mut surfaced: Option<LogEntry> = None;

    loop {
        sleep(interval).await;
        tick += 1;

        let snapshot = match gateway.poll_status(handle).await {
            Ok(snapshot) => snapshot,
            Err(error) => return Verdict::Faulted { error, last },
        };

        surface_diagnostics(handle, tick, &snapshot, &mut surfaced);

        let status = snapshot.status;
        debug!(
            order_id = handle.order_id,
            tick,
            status = ?status,
            filled = %snapshot.filled,
            "Polled order status"
        );

        match status {
            Some(status) if status.is_accepted() => {
                return Verdict::Accepted { status, snapshot };
            }
            Some(status) if status.is_rejected() => {
                return Verdict::Rejected { status, snapshot };
            }
            _ => {}
        }

        last = Some(snapshot);

        if submitted_at.elapsed() >= timeout {
            return Verdict::TimedOut { ticks: tick, last };
        }
    }
}

/// Logs the most severe diagnostic whenever it changes between ticks.
fn surface_diagnostics(
    handle: &SubmissionHandle,
    tick: u32,
    snapshot: &StatusSnapshot,
    surfaced: &mut Option<LogEntry>,
) {
    let Some(entry) = snapshot.most_severe_entry() else {
        return;
    };

    if surfaced.as_ref() == Some(entry) {
        return;
    }

    match entry.severity() {
        Severity::Error => warn!(
            order_id = handle.order_id,
            tick,
            error_code = entry.error_code,
            "Gateway reported: {}",
            entry.message
        ),
        Severity::Warning | Severity::Info => info!(
            order_id = handle.order_id,
            tick,
            error_code = entry.error_code,
            "Gateway reported: {}",
            entry.message
        ),
    }

    *surfaced = Some(entry.clone());
}
