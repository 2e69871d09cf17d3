//! Provider webhook payload shapes and canonical event normalization.
//!
//! The provider delivers `reaction.created`, `cast.created`, and
//! `follow.created` events. Normalization maps them onto the canonical
//! `InteractionEvent` or drops them (original casts, unknown types,
//! self-interactions). Signature verification happens before any payload
//! here is parsed; see `api::signature`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::error::ValidationError;
use super::types::{InteractionEvent, InteractionKind};

/// Raw webhook envelope: an event type tag plus a type-specific payload
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

/// A user as the provider describes them
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookUser {
    pub fid: u64,
    #[serde(default)]
    pub verified_addresses: Option<VerifiedAddresses>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifiedAddresses {
    #[serde(default)]
    pub eth_addresses: Vec<String>,
}

impl WebhookUser {
    /// First verified wallet address, lowercased; None if unverified
    fn primary_address(&self) -> Option<String> {
        self.verified_addresses
            .as_ref()
            .and_then(|v| v.eth_addresses.first())
            .map(|a| a.to_lowercase())
    }
}

/// `reaction.created` payload
#[derive(Debug, Clone, Deserialize)]
pub struct ReactionPayload {
    /// "like" or "recast"
    pub reaction_type: String,
    pub user: WebhookUser,
    pub cast: ReactionCast,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionCast {
    pub hash: String,
    pub author: WebhookUser,
}

/// `cast.created` payload. Tippable only as a reply (carries a parent
/// reference) or a quote (carries an embedded cast); original casts
/// produce no event.
#[derive(Debug, Clone, Deserialize)]
pub struct CastPayload {
    pub hash: String,
    pub author: WebhookUser,
    #[serde(default)]
    pub parent_hash: Option<String>,
    #[serde(default)]
    pub parent_author: Option<WebhookUser>,
    #[serde(default)]
    pub embeds: Vec<CastEmbed>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CastEmbed {
    #[serde(default)]
    pub cast: Option<EmbeddedCast>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedCast {
    pub hash: String,
    pub author: WebhookUser,
}

/// `follow.created` payload
#[derive(Debug, Clone, Deserialize)]
pub struct FollowPayload {
    pub user: WebhookUser,
    pub target_user: WebhookUser,
    pub timestamp: DateTime<Utc>,
}

/// Map a verified provider payload onto the canonical event.
///
/// Returns `Ok(None)` for payloads that are recognized but not tippable:
/// unknown event types, original casts, unknown reaction types, and
/// self-interactions. Returns `Err` only when a known event type carries a
/// payload that does not match its declared shape.
pub fn normalize(envelope: &WebhookEnvelope) -> Result<Option<InteractionEvent>, ValidationError> {
    match envelope.event_type.as_str() {
        "reaction.created" => {
            let payload: ReactionPayload = parse_data(&envelope.data)?;
            let kind = match payload.reaction_type.as_str() {
                "like" => InteractionKind::Like,
                "recast" => InteractionKind::Recast,
                _ => return Ok(None),
            };
            Ok(build_event(
                kind,
                &payload.cast.author,
                &payload.user,
                payload.cast.hash.clone(),
                payload.timestamp,
            ))
        }
        "cast.created" => {
            let payload: CastPayload = parse_data(&envelope.data)?;
            if let (Some(_parent_hash), Some(parent_author)) =
                (&payload.parent_hash, &payload.parent_author)
            {
                return Ok(build_event(
                    InteractionKind::Reply,
                    parent_author,
                    &payload.author,
                    payload.hash.clone(),
                    payload.timestamp,
                ));
            }
            if let Some(embedded) = payload.embeds.iter().find_map(|e| e.cast.as_ref()) {
                return Ok(build_event(
                    InteractionKind::Quote,
                    &embedded.author,
                    &payload.author,
                    payload.hash.clone(),
                    payload.timestamp,
                ));
            }
            // Original cast: nothing to tip
            Ok(None)
        }
        "follow.created" => {
            let payload: FollowPayload = parse_data(&envelope.data)?;
            Ok(build_event(
                InteractionKind::Follow,
                &payload.target_user,
                &payload.user,
                String::new(),
                payload.timestamp,
            ))
        }
        _ => Ok(None),
    }
}

fn parse_data<T: serde::de::DeserializeOwned>(
    data: &serde_json::Value,
) -> Result<T, ValidationError> {
    serde_json::from_value(data.clone()).map_err(|e| ValidationError::Malformed(e.to_string()))
}

fn build_event(
    kind: InteractionKind,
    recipient: &WebhookUser,
    interactor: &WebhookUser,
    cast_ref: String,
    occurred_at: DateTime<Utc>,
) -> Option<InteractionEvent> {
    // Self-interactions never pay out
    if recipient.fid == interactor.fid {
        return None;
    }
    Some(InteractionEvent {
        kind,
        recipient_fid: recipient.fid,
        interactor_fid: interactor.fid,
        cast_ref,
        occurred_at,
        recipient_address: recipient.primary_address(),
        interactor_address: interactor.primary_address(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(fid: u64, address: Option<&str>) -> serde_json::Value {
        match address {
            Some(addr) => json!({
                "fid": fid,
                "verified_addresses": { "eth_addresses": [addr] }
            }),
            None => json!({ "fid": fid }),
        }
    }

    fn envelope(event_type: &str, data: serde_json::Value) -> WebhookEnvelope {
        WebhookEnvelope {
            event_type: event_type.to_string(),
            data,
        }
    }

    #[test]
    fn test_like_reaction_normalizes() {
        let env = envelope(
            "reaction.created",
            json!({
                "reaction_type": "like",
                "user": user(2, Some("0xBBBB")),
                "cast": { "hash": "0xabc", "author": user(1, Some("0xAAAA")) },
                "timestamp": "2026-01-01T00:00:00Z"
            }),
        );

        let event = normalize(&env).unwrap().unwrap();
        assert_eq!(event.kind, InteractionKind::Like);
        assert_eq!(event.recipient_fid, 1);
        assert_eq!(event.interactor_fid, 2);
        assert_eq!(event.cast_ref, "0xabc");
        assert_eq!(event.recipient_address.as_deref(), Some("0xaaaa"));
        assert_eq!(event.interactor_address.as_deref(), Some("0xbbbb"));
        assert!(!event.is_unaddressable());
    }

    #[test]
    fn test_recast_reaction_normalizes() {
        let env = envelope(
            "reaction.created",
            json!({
                "reaction_type": "recast",
                "user": user(2, None),
                "cast": { "hash": "0xabc", "author": user(1, Some("0xAAAA")) },
                "timestamp": "2026-01-01T00:00:00Z"
            }),
        );

        let event = normalize(&env).unwrap().unwrap();
        assert_eq!(event.kind, InteractionKind::Recast);
        // Interactor has no verified address
        assert!(event.is_unaddressable());
    }

    #[test]
    fn test_unknown_reaction_type_is_ignored() {
        let env = envelope(
            "reaction.created",
            json!({
                "reaction_type": "bookmark",
                "user": user(2, None),
                "cast": { "hash": "0xabc", "author": user(1, None) },
                "timestamp": "2026-01-01T00:00:00Z"
            }),
        );
        assert!(normalize(&env).unwrap().is_none());
    }

    #[test]
    fn test_reply_cast_normalizes() {
        let env = envelope(
            "cast.created",
            json!({
                "hash": "0xreply",
                "author": user(2, Some("0xBBBB")),
                "parent_hash": "0xparent",
                "parent_author": user(1, Some("0xAAAA")),
                "timestamp": "2026-01-01T00:00:00Z"
            }),
        );

        let event = normalize(&env).unwrap().unwrap();
        assert_eq!(event.kind, InteractionKind::Reply);
        assert_eq!(event.recipient_fid, 1);
        assert_eq!(event.cast_ref, "0xreply");
    }

    #[test]
    fn test_original_cast_produces_no_event() {
        let env = envelope(
            "cast.created",
            json!({
                "hash": "0xoriginal",
                "author": user(2, Some("0xBBBB")),
                "timestamp": "2026-01-01T00:00:00Z"
            }),
        );
        assert!(normalize(&env).unwrap().is_none());
    }

    #[test]
    fn test_quote_cast_normalizes() {
        let env = envelope(
            "cast.created",
            json!({
                "hash": "0xquote",
                "author": user(2, Some("0xBBBB")),
                "embeds": [
                    { "cast": { "hash": "0xquoted", "author": user(1, Some("0xAAAA")) } }
                ],
                "timestamp": "2026-01-01T00:00:00Z"
            }),
        );

        let event = normalize(&env).unwrap().unwrap();
        assert_eq!(event.kind, InteractionKind::Quote);
        assert_eq!(event.recipient_fid, 1);
        assert_eq!(event.cast_ref, "0xquote");
    }

    #[test]
    fn test_follow_normalizes_with_empty_cast_ref() {
        let env = envelope(
            "follow.created",
            json!({
                "user": user(2, Some("0xBBBB")),
                "target_user": user(1, Some("0xAAAA")),
                "timestamp": "2026-01-01T00:00:00Z"
            }),
        );

        let event = normalize(&env).unwrap().unwrap();
        assert_eq!(event.kind, InteractionKind::Follow);
        assert_eq!(event.recipient_fid, 1);
        assert_eq!(event.interactor_fid, 2);
        assert!(event.cast_ref.is_empty());
    }

    #[test]
    fn test_self_interaction_is_ignored() {
        let env = envelope(
            "reaction.created",
            json!({
                "reaction_type": "like",
                "user": user(1, Some("0xAAAA")),
                "cast": { "hash": "0xabc", "author": user(1, Some("0xAAAA")) },
                "timestamp": "2026-01-01T00:00:00Z"
            }),
        );
        assert!(normalize(&env).unwrap().is_none());
    }

    #[test]
    fn test_unknown_event_type_is_ignored() {
        let env = envelope("channel.created", json!({}));
        assert!(normalize(&env).unwrap().is_none());
    }

    #[test]
    fn test_malformed_known_type_is_rejected() {
        let env = envelope("follow.created", json!({ "user": "not_a_user" }));
        assert!(normalize(&env).is_err());
    }
}
