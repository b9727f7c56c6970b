use omniagent_core::RiskLevel;
use tokio::sync::oneshot;

/// Single-slot human-approval signal.
///
/// The slot is armed before the choice is presented, so the producer can
/// never race the consumer, and the ticket resolves by move: exactly one of
/// approve/reject can ever fire.
pub struct ApprovalSlot;

impl ApprovalSlot {
    pub fn arm() -> (ApprovalTicket, ApprovalWait) {
        let (tx, rx) = oneshot::channel();
        (ApprovalTicket { tx }, ApprovalWait { rx })
    }
}

pub struct ApprovalTicket {
    tx: oneshot::Sender<bool>,
}

impl ApprovalTicket {
    pub fn approve(self) {
        let _ = self.tx.send(true);
    }

    pub fn reject(self) {
        let _ = self.tx.send(false);
    }

    pub fn resolve(self, approved: bool) {
        let _ = self.tx.send(approved);
    }
}

pub struct ApprovalWait {
    rx: oneshot::Receiver<bool>,
}

impl ApprovalWait {
    /// Suspend until the ticket resolves. A dropped ticket counts as a
    /// rejection: fail closed.
    pub async fn wait(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}

/// Sent to the panel when the risk gate blocks an action.
pub struct ApprovalRequest {
    pub summary: String,
    pub risk: RiskLevel,
    pub ticket: ApprovalTicket,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn approve_resolves_true() {
        let (ticket, wait) = ApprovalSlot::arm();
        ticket.approve();
        assert!(wait.wait().await);
    }

    #[tokio::test]
    async fn reject_resolves_false() {
        let (ticket, wait) = ApprovalSlot::arm();
        ticket.reject();
        assert!(!wait.wait().await);
    }

    #[tokio::test]
    async fn dropped_ticket_fails_closed() {
        let (ticket, wait) = ApprovalSlot::arm();
        drop(ticket);
        assert!(!wait.wait().await);
    }
}
