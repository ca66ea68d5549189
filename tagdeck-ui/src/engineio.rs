//! Engine.IO v4 / Socket.IO v5 text framing
//!
//! Only the text subset the backend uses is supported: handshake, ping/pong,
//! namespace connect/disconnect and JSON events. Binary attachments are
//! rejected.
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,"pingTimeout":20000}   open
//! 2 / 3                                                    ping / pong
//! 40/status,                                               connect namespace
//! 42/status,["tag",{"attributes":"all","tagId":"1"}]       event
//! ```

use serde::Deserialize;
use serde_json::Value;
use tagdeck_common::{Error, Result};

/// Handshake payload of the `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

/// Transport-level packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::Protocol("empty engine.io frame".to_string()))?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(rest.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(Error::Protocol(format!("unknown engine.io packet type {:?}", other))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            // Servers send this; clients never do, but keep the codec total.
            EnginePacket::Open(h) => format!(
                "0{}",
                serde_json::json!({"sid": h.sid, "pingInterval": h.ping_interval, "pingTimeout": h.ping_timeout})
            ),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Message(body) => format!("4{}", body),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet carried inside an engine `message`
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect { namespace: String, data: Option<Value> },
    Disconnect { namespace: String },
    Event { namespace: String, name: String, payload: Value, ack: Option<u64> },
    Ack { namespace: String, ack: u64, data: Value },
    ConnectError { namespace: String, message: String },
}

impl SocketPacket {
    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn connect(namespace: &str) -> Self {
        SocketPacket::Connect {
            namespace: namespace.to_string(),
            data: None,
        }
    }

    pub fn event(namespace: &str, name: &str, payload: Value) -> Self {
        SocketPacket::Event {
            namespace: namespace.to_string(),
            name: name.to_string(),
            payload,
            ack: None,
        }
    }

    /// Decode the body of an engine `message` packet
    pub fn decode(body: &str) -> Result<Self> {
        let mut chars = body.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::Protocol("empty socket.io packet".to_string()))?;
        let mut rest = chars.as_str();

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let ns = &rest[..idx];
                    rest = &rest[idx + 1..];
                    ns.to_string()
                }
                None => {
                    let ns = rest.to_string();
                    rest = "";
                    ns
                }
            }
        } else {
            "/".to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| Error::Protocol(format!("bad ack id: {}", e)))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        match kind {
            '0' => Ok(SocketPacket::Connect { namespace, data }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let (name, payload) = split_event(data)?;
                Ok(SocketPacket::Event { namespace, name, payload, ack })
            }
            '3' => Ok(SocketPacket::Ack {
                namespace,
                ack: ack.ok_or_else(|| Error::Protocol("ack packet without id".to_string()))?,
                data: data.unwrap_or(Value::Null),
            }),
            '4' => {
                let message = match data {
                    Some(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("connection refused")
                        .to_string(),
                    Some(Value::String(s)) => s,
                    _ => "connection refused".to_string(),
                };
                Ok(SocketPacket::ConnectError { namespace, message })
            }
            '5' | '6' => Err(Error::Protocol("binary socket.io packets are not supported".to_string())),
            other => Err(Error::Protocol(format!("unknown socket.io packet type {:?}", other))),
        }
    }

    /// Encode as a complete engine frame (with the leading `4`)
    pub fn encode(&self) -> String {
        let body = match self {
            SocketPacket::Connect { namespace, data } => {
                format!("0{}{}", ns_prefix(namespace), data.as_ref().map(Value::to_string).unwrap_or_default())
            }
            SocketPacket::Disconnect { namespace } => format!("1{}", ns_prefix(namespace)),
            SocketPacket::Event { namespace, name, payload, ack } => {
                let mut args = vec![Value::String(name.clone())];
                if !payload.is_null() {
                    args.push(payload.clone());
                }
                format!(
                    "2{}{}{}",
                    ns_prefix(namespace),
                    ack.map(|a| a.to_string()).unwrap_or_default(),
                    Value::Array(args)
                )
            }
            SocketPacket::Ack { namespace, ack, data } => {
                format!("3{}{}{}", ns_prefix(namespace), ack, Value::Array(vec![data.clone()]))
            }
            SocketPacket::ConnectError { namespace, message } => {
                format!("4{}{}", ns_prefix(namespace), serde_json::json!({"message": message}))
            }
        };
        EnginePacket::Message(body).encode()
    }
}

fn ns_prefix(namespace: &str) -> String {
    if namespace == "/" {
        String::new()
    } else {
        format!("{},", namespace)
    }
}

/// `["name", payload, ...]` -> (name, payload). Extra arguments are dropped.
fn split_event(data: Option<Value>) -> Result<(String, Value)> {
    let Some(Value::Array(mut args)) = data else {
        return Err(Error::Protocol("event packet without argument array".to_string()));
    };
    if args.is_empty() {
        return Err(Error::Protocol("event packet without name".to_string()));
    }
    let payload = if args.len() > 1 { args.swap_remove(1) } else { Value::Null };
    match args.swap_remove(0) {
        Value::String(name) => Ok((name, payload)),
        other => Err(Error::Protocol(format!("event name must be a string, got {}", other))),
    }
}
