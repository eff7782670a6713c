use serde::{Deserialize, Serialize};

/// Every message on a streaming session, in either direction.
///
/// Wire form is `{"type": ..., "data": ...}`; unit variants omit `data`.
/// The server emits `connected` once the underlying stream is open,
/// `log`/`stdout`/`stderr` for payload, `error` for failures, and `close`
/// on termination. Clients send `stdin`, `resize`, and `ping`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Envelope {
    Log(String),
    Error(String),
    Connected(String),
    Close(String),
    Info(String),
    Stdin(String),
    Stdout(String),
    Stderr(String),
    Resize(TerminalDimensions),
    Ping,
    Pong,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalDimensions {
    pub cols: u16,
    pub rows: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_variants_carry_data() {
        let json = serde_json::to_value(Envelope::Log("[web-1]: ready".to_string())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "log", "data": "[web-1]: ready"})
        );

        let parsed: Envelope =
            serde_json::from_str(r#"{"type":"stdin","data":"ls -la\n"}"#).unwrap();
        assert_eq!(parsed, Envelope::Stdin("ls -la\n".to_string()));
    }

    #[test]
    fn heartbeat_variants_omit_data() {
        assert_eq!(
            serde_json::to_string(&Envelope::Ping).unwrap(),
            r#"{"type":"ping"}"#
        );
        let parsed: Envelope = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(parsed, Envelope::Pong);
    }

    #[test]
    fn resize_carries_dimensions() {
        let parsed: Envelope =
            serde_json::from_str(r#"{"type":"resize","data":{"cols":120,"rows":40}}"#).unwrap();
        assert_eq!(
            parsed,
            Envelope::Resize(TerminalDimensions {
                cols: 120,
                rows: 40
            })
        );
    }
}
