use tokio::sync::mpsc;

use crate::Envelope;

/// Per-session channel capacity. Deliberately small: a slow client backs
/// the writer up, which in turn blocks the upstream readers instead of
/// queueing unboundedly.
pub(crate) const SESSION_BUFFER: usize = 16;

/// The session's view of its client connection: envelopes out, envelopes
/// in. The HTTP layer pumps these over the WebSocket; tests drive them
/// directly.
pub struct SessionIo {
    pub outbound: mpsc::Sender<Envelope>,
    pub inbound: mpsc::Receiver<Envelope>,
}

impl SessionIo {
    /// Builds a session IO pair plus the client-side handles.
    pub fn channel() -> (Self, mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
        let (outbound, client_rx) = mpsc::channel(SESSION_BUFFER);
        let (client_tx, inbound) = mpsc::channel(SESSION_BUFFER);
        (Self { outbound, inbound }, client_tx, client_rx)
    }

    /// Reports a failure to the client and terminates the session stream.
    pub async fn fail(&self, message: impl Into<String>) {
        let _ = self.outbound.send(Envelope::Error(message.into())).await;
        let _ = self.outbound.send(Envelope::Close(String::new())).await;
    }
}
