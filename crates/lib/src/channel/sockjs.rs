//! SockJS WebSocket-transport envelope.
//!
//! Server frames: `o` (open), `h` (heartbeat), `a["..",".."]` (messages), `m".."` (single
//! message), `c[code,"reason"]` (close). Client frames are a JSON array of strings.

use rand::Rng;

use super::transport::ChannelError;

#[derive(Debug, Clone, PartialEq)]
pub enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close(u16, String),
}

pub fn decode(text: &str) -> Result<SockJsFrame, ChannelError> {
    let bad = |e: serde_json::Error| ChannelError::Protocol(format!("bad SockJS frame: {}", e));
    match text.chars().next() {
        Some('o') => Ok(SockJsFrame::Open),
        Some('h') => Ok(SockJsFrame::Heartbeat),
        Some('a') => Ok(SockJsFrame::Messages(
            serde_json::from_str(&text[1..]).map_err(bad)?,
        )),
        Some('m') => Ok(SockJsFrame::Messages(vec![
            serde_json::from_str(&text[1..]).map_err(bad)?
        ])),
        Some('c') => {
            let (code, reason): (u16, String) = serde_json::from_str(&text[1..]).map_err(bad)?;
            Ok(SockJsFrame::Close(code, reason))
        }
        _ => Err(ChannelError::Protocol(format!(
            "unknown SockJS frame {:?}",
            text.chars().take(16).collect::<String>()
        ))),
    }
}

/// Wrap one outbound payload.
pub fn encode(payload: &str) -> String {
    serde_json::Value::Array(vec![serde_json::Value::String(payload.to_string())]).to_string()
}

/// `{endpoint}/{server}/{session}/websocket` with a random 3-digit server id and a fresh session id.
pub fn session_url(endpoint_url: &str) -> String {
    let server: u16 = rand::thread_rng().gen_range(0..1000);
    let session = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}/{:03}/{}/websocket",
        endpoint_url.trim_end_matches('/'),
        server,
        session
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_server_frames() {
        assert_eq!(decode("o").unwrap(), SockJsFrame::Open);
        assert_eq!(decode("h").unwrap(), SockJsFrame::Heartbeat);
        assert_eq!(
            decode(r#"a["CONNECTED\nversion:1.2\n\n\u0000"]"#).unwrap(),
            SockJsFrame::Messages(vec!["CONNECTED\nversion:1.2\n\n\0".to_string()])
        );
        assert_eq!(
            decode(r#"c[3000,"Go away!"]"#).unwrap(),
            SockJsFrame::Close(3000, "Go away!".into())
        );
        assert!(decode("x").is_err());
        assert!(decode("a[oops").is_err());
    }

    #[test]
    fn encodes_nul_terminated_payload() {
        assert_eq!(encode("DISCONNECT\n\n\0"), r#"["DISCONNECT\n\n\u0000"]"#);
    }

    #[test]
    fn session_url_shape() {
        let url = session_url("ws://localhost:8080/ws/");
        assert!(url.starts_with("ws://localhost:8080/ws/"));
        assert!(url.ends_with("/websocket"));
        assert_eq!(url.trim_start_matches("ws://").split('/').count(), 5);
    }
}
