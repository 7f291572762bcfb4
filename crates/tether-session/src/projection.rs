// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping from protocol facts to log events and syncable rows.
//!
//! Event ids are derived from the platform's own identifiers so that a
//! replayed protocol event lands on the same id and is deduplicated by the
//! log. Entity ids are the stable identities replicas upsert by.

use chrono::{DateTime, Utc};
use serde_json::json;
use tether_core::types::{
    ContactUpdate, GroupUpdate, IncomingMessage, Presence, Receipt, SendReceipt,
};
use tether_core::{EntityType, EventType, NewEvent, OutboxEntry, ProtocolEvent, TetherError};
use tether_storage::EntityWrite;

/// A log event plus the entity rows it updates.
#[derive(Debug, Clone, PartialEq)]
pub struct Projected {
    pub event: NewEvent,
    pub writes: Vec<EntityWrite>,
}

/// Stable id of a message row.
pub fn message_entity_id(conversation_id: &str, message_id: &str) -> String {
    format!("{conversation_id}:{message_id}")
}

/// Project a content event. Lifecycle events return `None`; they are
/// handled by the session state machine.
pub fn project(account_id: &str, event: &ProtocolEvent) -> Result<Option<Projected>, TetherError> {
    let projected = match event {
        ProtocolEvent::Message(msg) => message(account_id, msg)?,
        ProtocolEvent::Receipt(receipt) => receipt_event(account_id, receipt)?,
        ProtocolEvent::Presence(presence) => presence_event(account_id, presence)?,
        ProtocolEvent::ContactUpdate(update) => contact_event(account_id, update)?,
        ProtocolEvent::GroupUpdate(update) => group_event(account_id, update)?,
        ProtocolEvent::PairingCode { .. }
        | ProtocolEvent::PairTimeout
        | ProtocolEvent::PairError { .. }
        | ProtocolEvent::Connected { .. }
        | ProtocolEvent::Disconnected { .. }
        | ProtocolEvent::LoggedOut { .. } => return Ok(None),
    };
    Ok(Some(projected))
}

/// Event recording a lifecycle transition of a session.
pub fn lifecycle_event(
    account_id: &str,
    session_id: &str,
    counter: u64,
    event_type: EventType,
    payload: serde_json::Value,
    timestamp: DateTime<Utc>,
) -> NewEvent {
    NewEvent {
        id: format!("{session_id}:{event_type}:{counter}"),
        event_type,
        account_id: account_id.to_string(),
        conversation_id: None,
        external_message_id: None,
        payload,
        attachment_ref: None,
        timestamp,
    }
}

/// Event and message row for a delivered outbox entry.
pub fn sent_message(entry: &OutboxEntry, receipt: &SendReceipt) -> Projected {
    let message_id = &receipt.external_message_id;
    let conversation_id = &entry.conversation_id;
    let text = entry.payload.get("text").cloned().unwrap_or(serde_json::Value::Null);

    let event = NewEvent {
        id: format!("outbox:{}", entry.idempotency_key),
        event_type: EventType::MessageSent,
        account_id: entry.account_id.clone(),
        conversation_id: Some(conversation_id.clone()),
        external_message_id: Some(message_id.clone()),
        payload: entry.payload.clone(),
        attachment_ref: None,
        timestamp: receipt.timestamp,
    };
    let writes = vec![
        EntityWrite::new(
            EntityType::Messages,
            message_entity_id(conversation_id, message_id),
            json!({
                "conversation_id": conversation_id,
                "message_id": message_id,
                "from_me": true,
                "text": text,
                "status": "sent",
                "idempotency_key": entry.idempotency_key,
                "timestamp": receipt.timestamp,
            }),
        ),
        EntityWrite::new(
            EntityType::Conversations,
            conversation_id.clone(),
            json!({
                "last_message_id": message_id,
                "last_message_at": receipt.timestamp,
            }),
        ),
    ];
    Projected { event, writes }
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, TetherError> {
    serde_json::to_value(value).map_err(|e| TetherError::Internal(e.to_string()))
}

fn message(account_id: &str, msg: &IncomingMessage) -> Result<Projected, TetherError> {
    let event_type = if msg.from_me {
        EventType::MessageSent
    } else {
        EventType::MessageReceived
    };
    let event = NewEvent {
        id: format!("{account_id}:message:{}:{}", msg.conversation_id, msg.id),
        event_type,
        account_id: account_id.to_string(),
        conversation_id: Some(msg.conversation_id.clone()),
        external_message_id: Some(msg.id.clone()),
        payload: to_payload(msg)?,
        attachment_ref: msg.attachment.as_ref().map(|a| a.id.clone()),
        timestamp: msg.timestamp,
    };

    let mut writes = vec![
        EntityWrite::new(
            EntityType::Messages,
            message_entity_id(&msg.conversation_id, &msg.id),
            json!({
                "conversation_id": msg.conversation_id,
                "message_id": msg.id,
                "sender": msg.sender,
                "from_me": msg.from_me,
                "text": msg.text,
                "attachment_id": msg.attachment.as_ref().map(|a| &a.id),
                "status": if msg.from_me { "sent" } else { "received" },
                "timestamp": msg.timestamp,
            }),
        ),
        EntityWrite::new(
            EntityType::Conversations,
            msg.conversation_id.clone(),
            json!({
                "last_message_id": msg.id,
                "last_message_at": msg.timestamp,
            }),
        ),
    ];
    if let Some(attachment) = &msg.attachment {
        writes.push(EntityWrite::new(
            EntityType::Media,
            attachment.id.clone(),
            json!({
                "message_id": msg.id,
                "conversation_id": msg.conversation_id,
                "mime_type": attachment.mime_type,
                "url": attachment.url,
                "size_bytes": attachment.size_bytes,
            }),
        ));
    }
    Ok(Projected { event, writes })
}

fn receipt_event(account_id: &str, receipt: &Receipt) -> Result<Projected, TetherError> {
    let event = NewEvent {
        id: format!(
            "{account_id}:receipt:{}:{}:{}",
            receipt.conversation_id, receipt.message_id, receipt.status
        ),
        event_type: EventType::Receipt,
        account_id: account_id.to_string(),
        conversation_id: Some(receipt.conversation_id.clone()),
        external_message_id: Some(receipt.message_id.clone()),
        payload: to_payload(receipt)?,
        attachment_ref: None,
        timestamp: receipt.timestamp,
    };
    let writes = vec![EntityWrite::new(
        EntityType::Messages,
        message_entity_id(&receipt.conversation_id, &receipt.message_id),
        json!({
            "status": receipt.status,
            "status_at": receipt.timestamp,
        }),
    )];
    Ok(Projected { event, writes })
}

fn presence_event(account_id: &str, presence: &Presence) -> Result<Projected, TetherError> {
    let event = NewEvent {
        id: format!(
            "{account_id}:presence:{}:{}",
            presence.contact_id,
            presence.timestamp.timestamp_millis()
        ),
        event_type: EventType::Presence,
        account_id: account_id.to_string(),
        conversation_id: None,
        external_message_id: None,
        payload: to_payload(presence)?,
        attachment_ref: None,
        timestamp: presence.timestamp,
    };
    let writes = vec![EntityWrite::new(
        EntityType::Contacts,
        presence.contact_id.clone(),
        json!({
            "available": presence.available,
            "last_seen": presence.timestamp,
        }),
    )];
    Ok(Projected { event, writes })
}

fn contact_event(account_id: &str, update: &ContactUpdate) -> Result<Projected, TetherError> {
    let event = NewEvent {
        id: format!(
            "{account_id}:contact:{}:{}",
            update.contact_id,
            update.timestamp.timestamp_millis()
        ),
        event_type: EventType::ContactUpdated,
        account_id: account_id.to_string(),
        conversation_id: None,
        external_message_id: None,
        payload: to_payload(update)?,
        attachment_ref: None,
        timestamp: update.timestamp,
    };

    let mut data = serde_json::Map::new();
    if let Some(name) = &update.display_name {
        data.insert("display_name".into(), json!(name));
    }
    if let Some(phone) = &update.phone {
        data.insert("phone".into(), json!(phone));
    }
    data.insert("updated_at".into(), json!(update.timestamp));
    let writes = vec![EntityWrite::new(
        EntityType::Contacts,
        update.contact_id.clone(),
        serde_json::Value::Object(data),
    )];
    Ok(Projected { event, writes })
}

fn group_event(account_id: &str, update: &GroupUpdate) -> Result<Projected, TetherError> {
    let event = NewEvent {
        id: format!(
            "{account_id}:group:{}:{}",
            update.conversation_id,
            update.timestamp.timestamp_millis()
        ),
        event_type: EventType::GroupUpdated,
        account_id: account_id.to_string(),
        conversation_id: Some(update.conversation_id.clone()),
        external_message_id: None,
        payload: to_payload(update)?,
        attachment_ref: None,
        timestamp: update.timestamp,
    };

    let mut conversation = serde_json::Map::new();
    conversation.insert("is_group".into(), json!(true));
    if let Some(subject) = &update.subject {
        conversation.insert("subject".into(), json!(subject));
    }
    if !update.participants.is_empty() {
        conversation.insert("participants".into(), json!(update.participants));
    }

    let mut writes = vec![EntityWrite::new(
        EntityType::Conversations,
        update.conversation_id.clone(),
        serde_json::Value::Object(conversation),
    )];
    writes.extend(update.participants.iter().map(|member| {
        EntityWrite::new(
            EntityType::Participants,
            format!("{}:{member}", update.conversation_id),
            json!({
                "conversation_id": update.conversation_id,
                "contact_id": member,
                "updated_at": update.timestamp,
            }),
        )
    }));
    Ok(Projected { event, writes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tether_core::OutboxStatus;
    use tether_core::types::Attachment;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap()
    }

    fn incoming(from_me: bool, attachment: Option<Attachment>) -> ProtocolEvent {
        ProtocolEvent::Message(IncomingMessage {
            id: "M1".into(),
            conversation_id: "c1".into(),
            sender: "alice".into(),
            text: Some("hello".into()),
            attachment,
            from_me,
            timestamp: ts(),
        })
    }

    #[test]
    fn lifecycle_events_are_not_projected() {
        for event in [
            ProtocolEvent::PairTimeout,
            ProtocolEvent::Connected {
                external_id: "x".into(),
            },
            ProtocolEvent::LoggedOut { reason: None },
        ] {
            assert!(project("acct", &event).unwrap().is_none());
        }
    }

    #[test]
    fn message_projects_message_and_conversation_rows() {
        let projected = project("acct", &incoming(false, None)).unwrap().unwrap();
        assert_eq!(projected.event.id, "acct:message:c1:M1");
        assert_eq!(projected.event.event_type, EventType::MessageReceived);
        assert_eq!(projected.event.external_message_id.as_deref(), Some("M1"));

        let kinds: Vec<EntityType> = projected.writes.iter().map(|w| w.entity_type).collect();
        assert_eq!(kinds, vec![EntityType::Messages, EntityType::Conversations]);
        assert_eq!(projected.writes[0].id, "c1:M1");
        assert_eq!(projected.writes[0].data["status"], "received");
    }

    #[test]
    fn replayed_message_maps_to_the_same_event_id() {
        let a = project("acct", &incoming(false, None)).unwrap().unwrap();
        let b = project("acct", &incoming(false, None)).unwrap().unwrap();
        assert_eq!(a.event.id, b.event.id);
    }

    #[test]
    fn own_message_with_attachment_adds_media_row() {
        let attachment = Attachment {
            id: "media-1".into(),
            mime_type: "image/jpeg".into(),
            url: None,
            size_bytes: Some(2048),
        };
        let projected = project("acct", &incoming(true, Some(attachment))).unwrap().unwrap();
        assert_eq!(projected.event.event_type, EventType::MessageSent);
        assert_eq!(projected.event.attachment_ref.as_deref(), Some("media-1"));
        let media = projected
            .writes
            .iter()
            .find(|w| w.entity_type == EntityType::Media)
            .unwrap();
        assert_eq!(media.data["size_bytes"], 2048);
    }

    #[test]
    fn receipt_only_patches_status() {
        let event = ProtocolEvent::Receipt(Receipt {
            message_id: "M1".into(),
            conversation_id: "c1".into(),
            status: "read".into(),
            timestamp: ts(),
        });
        let projected = project("acct", &event).unwrap().unwrap();
        assert_eq!(projected.event.id, "acct:receipt:c1:M1:read");
        assert_eq!(projected.writes.len(), 1);
        assert_eq!(projected.writes[0].id, message_entity_id("c1", "M1"));
        assert!(projected.writes[0].data.get("text").is_none());
    }

    #[test]
    fn contact_update_writes_only_present_fields() {
        let event = ProtocolEvent::ContactUpdate(ContactUpdate {
            contact_id: "bob".into(),
            display_name: Some("Bob".into()),
            phone: None,
            timestamp: ts(),
        });
        let projected = project("acct", &event).unwrap().unwrap();
        let data = &projected.writes[0].data;
        assert_eq!(data["display_name"], "Bob");
        assert!(data.get("phone").is_none());
    }

    #[test]
    fn group_update_writes_participants() {
        let event = ProtocolEvent::GroupUpdate(GroupUpdate {
            conversation_id: "g1".into(),
            subject: Some("Team".into()),
            participants: vec!["a".into(), "b".into()],
            timestamp: ts(),
        });
        let projected = project("acct", &event).unwrap().unwrap();
        let participant_ids: Vec<&str> = projected
            .writes
            .iter()
            .filter(|w| w.entity_type == EntityType::Participants)
            .map(|w| w.id.as_str())
            .collect();
        assert_eq!(participant_ids, vec!["g1:a", "g1:b"]);
    }

    #[test]
    fn sent_message_keys_event_by_idempotency_key() {
        let entry = OutboxEntry {
            idempotency_key: "k-1".into(),
            account_id: "acct".into(),
            conversation_id: "c1".into(),
            payload: json!({"text": "hi"}),
            status: OutboxStatus::Sending,
            event_seq: None,
            last_error: None,
            retry_count: 0,
            next_attempt_at: ts(),
            created_at: ts(),
            updated_at: ts(),
        };
        let receipt = SendReceipt {
            external_message_id: "wamid.9".into(),
            timestamp: ts(),
        };
        let projected = sent_message(&entry, &receipt);
        assert_eq!(projected.event.id, "outbox:k-1");
        assert_eq!(projected.writes[0].id, "c1:wamid.9");
        assert_eq!(projected.writes[0].data["text"], "hi");
    }
}
