//! Line-delimited JSON spoken with the bridge process.
//!
//! Requests (stdin), one object per line, tagged by `op`:
//! `start`, `send`, `list_groups`. Events (stdout), tagged by `type`:
//! `qr`, `open`, `close`, `creds`, `message`, `ack`, `groups`.

use serde::{Deserialize, Serialize};

use wab_core::{
    domain::{Credentials, GroupDescriptor, RecipientId},
    messaging::types::{DisconnectCause, InboundMessage, MessageBody, TransportEvent},
};

/// Close status the backend uses for logged-out / rejected credentials.
pub const STATUS_LOGGED_OUT: u16 = 401;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request<'a> {
    Start {
        #[serde(skip_serializing_if = "Option::is_none")]
        creds: Option<&'a serde_json::Value>,
    },
    Send {
        id: u64,
        to: &'a str,
        text: &'a str,
    },
    ListGroups {
        id: u64,
    },
}

impl Request<'_> {
    pub fn encode(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Qr {
        code: String,
    },
    Open,
    Close {
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
    },
    Creds {
        creds: serde_json::Value,
    },
    Message {
        jid: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        media: bool,
        #[serde(default)]
        from_me: bool,
    },
    Ack {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Groups {
        id: u64,
        groups: Vec<WireGroup>,
    },
}

/// Group entry as sent by the bridge; the id is validated in [`route`].
#[derive(Debug, Deserialize, PartialEq)]
pub struct WireGroup {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub subject: String,
}

/// Answer to a request, correlated by id.
#[derive(Debug, PartialEq)]
pub enum Reply {
    Ack { ok: bool, error: Option<String> },
    Groups(Vec<GroupDescriptor>),
}

/// Where a decoded event goes.
#[derive(Debug, PartialEq)]
pub enum Routed {
    Reply(u64, Reply),
    Event(TransportEvent),
    Skip,
}

pub fn decode(line: &str) -> serde_json::Result<Event> {
    serde_json::from_str(line)
}

pub fn classify_close(status: Option<u16>, reason: Option<&str>) -> DisconnectCause {
    let logged_out = status == Some(STATUS_LOGGED_OUT)
        || reason.is_some_and(|r| r.eq_ignore_ascii_case("logged_out"));
    if logged_out {
        return DisconnectCause::AuthExpired;
    }

    let reason = match (status, reason) {
        (Some(s), Some(r)) => format!("{r} (status {s})"),
        (Some(s), None) => format!("status {s}"),
        (None, Some(r)) => r.to_string(),
        (None, None) => "connection closed".to_string(),
    };
    DisconnectCause::Transport(reason)
}

pub fn route(event: Event) -> Routed {
    match event {
        Event::Qr { code } => Routed::Event(TransportEvent::LoginChallenge(code)),
        Event::Open => Routed::Event(TransportEvent::Opened),
        Event::Close { status, reason } => Routed::Event(TransportEvent::Closed(classify_close(
            status,
            reason.as_deref(),
        ))),
        Event::Creds { creds } => {
            Routed::Event(TransportEvent::CredentialsUpdated(Credentials(creds)))
        }
        Event::Message {
            jid,
            text,
            caption,
            media,
            from_me,
        } => {
            let Some(recipient) = RecipientId::new(jid) else {
                tracing::warn!("bridge message without a jid; skipping");
                return Routed::Skip;
            };
            let body = match (text, media || caption.is_some()) {
                (Some(text), _) => MessageBody::Text(text),
                (None, true) => MessageBody::Media { caption },
                (None, false) => MessageBody::Other,
            };
            Routed::Event(TransportEvent::Inbound(InboundMessage {
                recipient,
                body,
                from_me,
            }))
        }
        Event::Ack { id, ok, error } => Routed::Reply(id, Reply::Ack { ok, error }),
        Event::Groups { id, groups } => {
            let groups = groups
                .into_iter()
                .filter_map(|g| match RecipientId::new(g.id) {
                    Some(id) => Some(GroupDescriptor {
                        id,
                        subject: g.subject,
                    }),
                    None => {
                        tracing::warn!(subject = %g.subject, "bridge listed a group without an id; skipping");
                        None
                    }
                })
                .collect();
            Routed::Reply(id, Reply::Groups(groups))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn routed(line: &str) -> Routed {
        route(decode(line).unwrap())
    }

    fn rid(s: &str) -> RecipientId {
        RecipientId::new(s).unwrap()
    }

    #[test]
    fn requests_are_op_tagged_lines() {
        let creds = json!({"k": 1});
        let start = Request::Start { creds: Some(&creds) }.encode().unwrap();
        assert_eq!(start, "{\"op\":\"start\",\"creds\":{\"k\":1}}\n");

        let fresh = Request::Start { creds: None }.encode().unwrap();
        assert_eq!(fresh, "{\"op\":\"start\"}\n");

        let send = Request::Send {
            id: 7,
            to: "g@g.us",
            text: "hi\nthere",
        }
        .encode()
        .unwrap();
        assert_eq!(send.matches('\n').count(), 1, "embedded newlines must be escaped");
        let v: serde_json::Value = serde_json::from_str(send.trim_end()).unwrap();
        assert_eq!(v, json!({"op": "send", "id": 7, "to": "g@g.us", "text": "hi\nthere"}));

        let list = Request::ListGroups { id: 8 }.encode().unwrap();
        assert_eq!(list, "{\"op\":\"list_groups\",\"id\":8}\n");
    }

    #[test]
    fn lifecycle_events_map_to_transport_events() {
        assert_eq!(
            routed(r#"{"type":"qr","code":"2@abc"}"#),
            Routed::Event(TransportEvent::LoginChallenge("2@abc".to_string()))
        );
        assert_eq!(
            routed(r#"{"type":"open","extra":"ignored"}"#),
            Routed::Event(TransportEvent::Opened)
        );
        assert_eq!(
            routed(r#"{"type":"creds","creds":{"me":"x"}}"#),
            Routed::Event(TransportEvent::CredentialsUpdated(Credentials(json!({"me": "x"}))))
        );
    }

    #[test]
    fn close_is_classified_at_the_boundary() {
        assert_eq!(
            routed(r#"{"type":"close","status":401}"#),
            Routed::Event(TransportEvent::Closed(DisconnectCause::AuthExpired))
        );
        assert_eq!(
            routed(r#"{"type":"close","reason":"LOGGED_OUT"}"#),
            Routed::Event(TransportEvent::Closed(DisconnectCause::AuthExpired))
        );
        assert_eq!(
            routed(r#"{"type":"close","status":428,"reason":"connection_closed"}"#),
            Routed::Event(TransportEvent::Closed(DisconnectCause::Transport(
                "connection_closed (status 428)".to_string()
            )))
        );
        assert_eq!(
            classify_close(None, None),
            DisconnectCause::Transport("connection closed".to_string())
        );
    }

    #[test]
    fn messages_become_inbound_bodies() {
        assert_eq!(
            routed(r#"{"type":"message","jid":"a@s.whatsapp.net","text":"!links"}"#),
            Routed::Event(TransportEvent::Inbound(InboundMessage {
                recipient: rid("a@s.whatsapp.net"),
                body: MessageBody::Text("!links".to_string()),
                from_me: false,
            }))
        );
        assert_eq!(
            routed(r#"{"type":"message","jid":"g@g.us","media":true,"caption":"https://chat.whatsapp.com/X","from_me":true}"#),
            Routed::Event(TransportEvent::Inbound(InboundMessage {
                recipient: rid("g@g.us"),
                body: MessageBody::Media {
                    caption: Some("https://chat.whatsapp.com/X".to_string())
                },
                from_me: true,
            }))
        );
        assert_eq!(
            routed(r#"{"type":"message","jid":"g@g.us"}"#),
            Routed::Event(TransportEvent::Inbound(InboundMessage {
                recipient: rid("g@g.us"),
                body: MessageBody::Other,
                from_me: false,
            }))
        );
        assert_eq!(routed(r#"{"type":"message","jid":""}"#), Routed::Skip);
    }

    #[test]
    fn replies_carry_their_request_id() {
        assert_eq!(
            routed(r#"{"type":"ack","id":3,"ok":false,"error":"not-authorized"}"#),
            Routed::Reply(
                3,
                Reply::Ack {
                    ok: false,
                    error: Some("not-authorized".to_string())
                }
            )
        );
        assert_eq!(
            routed(r#"{"type":"groups","id":4,"groups":[{"id":"g@g.us","subject":"Promo"},{"id":"","subject":"Ghost"},{"id":"h@g.us"}]}"#),
            Routed::Reply(
                4,
                Reply::Groups(vec![
                    GroupDescriptor {
                        id: rid("g@g.us"),
                        subject: "Promo".to_string()
                    },
                    GroupDescriptor {
                        id: rid("h@g.us"),
                        subject: String::new()
                    },
                ])
            )
        );
    }

    #[test]
    fn unknown_or_malformed_lines_fail_to_decode() {
        assert!(decode(r#"{"type":"presence"}"#).is_err());
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"type":"ack","ok":true}"#).is_err());
    }
}
