//! JSON envelope tagged enum (§4.H, §6), grounded on the compact
//! `[tag, sub_id, ...payload]` arrays the original Python source builds in
//! `_create_*_message` and `enostr::negentropy::NegEvent::from_relay`'s
//! `serde_json::Value` array parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// A parsed, validated envelope. `NegErr` and `NegClose` are supplemented
/// beyond spec.md's tag list (§11.4-5): `enostr` sends/receives both for
/// the nearest real-world NIP-77 client, and spec.md's Non-goals don't
/// exclude them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    NegOpen {
        sub_id: String,
        filters: String,
        init_msg: String,
    },
    NegMsg {
        sub_id: String,
        hex: String,
    },
    NegErr {
        sub_id: String,
        reason: String,
    },
    NegClose {
        sub_id: String,
    },
    Req {
        sub_id: String,
        filters: String,
    },
    Event {
        sub_id: String,
        event_json: String,
    },
    Eose {
        sub_id: String,
    },
}

impl Envelope {
    pub fn sub_id(&self) -> &str {
        match self {
            Envelope::NegOpen { sub_id, .. }
            | Envelope::NegMsg { sub_id, .. }
            | Envelope::NegErr { sub_id, .. }
            | Envelope::NegClose { sub_id }
            | Envelope::Req { sub_id, .. }
            | Envelope::Event { sub_id, .. }
            | Envelope::Eose { sub_id } => sub_id,
        }
    }

    /// Parse a raw JSON-encoded envelope. Unknown tags and malformed
    /// payloads are never fatal (§7): the caller should log and drop,
    /// never propagate as a session-ending error.
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| Error::Envelope(format!("invalid json: {e}")))?;
        let arr = value
            .as_array()
            .ok_or_else(|| Error::Envelope("envelope is not a json array".to_string()))?;

        let tag = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Envelope("envelope missing tag".to_string()))?;

        let str_at = |i: usize| -> Result<String, Error> {
            arr.get(i)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::Envelope(format!("envelope missing field {i}")))
        };

        match tag {
            "NEG-OPEN" => Ok(Envelope::NegOpen {
                sub_id: str_at(1)?,
                filters: str_at(2)?,
                init_msg: str_at(3)?,
            }),
            "NEG-MSG" => Ok(Envelope::NegMsg {
                sub_id: str_at(1)?,
                hex: str_at(2)?,
            }),
            "NEG-ERR" => Ok(Envelope::NegErr {
                sub_id: str_at(1)?,
                reason: str_at(2)?,
            }),
            "NEG-CLOSE" => Ok(Envelope::NegClose { sub_id: str_at(1)? }),
            "REQ" => Ok(Envelope::Req {
                sub_id: str_at(1)?,
                filters: str_at(2)?,
            }),
            "EVENT" => Ok(Envelope::Event {
                sub_id: str_at(1)?,
                event_json: str_at(2)?,
            }),
            "EOSE" => Ok(Envelope::Eose { sub_id: str_at(1)? }),
            other => Err(Error::Envelope(format!("unknown envelope tag: {other}"))),
        }
    }

    /// Serialise back to the compact `[tag, ...]` wire form.
    pub fn to_json(&self) -> String {
        match self {
            Envelope::NegOpen {
                sub_id,
                filters,
                init_msg,
            } => json_array(&["NEG-OPEN", sub_id, filters, init_msg]),
            Envelope::NegMsg { sub_id, hex } => json_array(&["NEG-MSG", sub_id, hex]),
            Envelope::NegErr { sub_id, reason } => json_array(&["NEG-ERR", sub_id, reason]),
            Envelope::NegClose { sub_id } => json_array(&["NEG-CLOSE", sub_id]),
            Envelope::Req { sub_id, filters } => json_array(&["REQ", sub_id, filters]),
            Envelope::Event {
                sub_id,
                event_json,
            } => json_array(&["EVENT", sub_id, event_json]),
            Envelope::Eose { sub_id } => json_array(&["EOSE", sub_id]),
        }
    }
}

fn json_array(fields: &[&str]) -> String {
    serde_json::to_string(fields).unwrap_or_default()
}

/// Filters as embedded in `REQ`/`NEG-OPEN` payloads: just the `ids` list
/// this crate's reconciliation loop cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdFilters {
    #[serde(default)]
    pub ids: Vec<String>,
}

impl IdFilters {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(raw: &str) -> Result<Self, Error> {
        serde_json::from_str(raw).map_err(|e| Error::Envelope(format!("invalid filters json: {e}")))
    }
}

/// Strip colons from a MAC address to build the `sub_id`, matching
/// `device_address.replace(":", "")` in the original source.
pub fn sub_id_for_addr(addr: &str) -> String {
    addr.chars().filter(|&c| c != ':').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_neg_msg() {
        let raw = br#"["NEG-MSG","aabbcc","6100"]"#;
        let envelope = Envelope::parse(raw).unwrap();
        assert_eq!(
            envelope,
            Envelope::NegMsg {
                sub_id: "aabbcc".to_string(),
                hex: "6100".to_string(),
            }
        );
    }

    #[test]
    fn parses_neg_open_with_four_fields() {
        let raw = br#"["NEG-OPEN","aabbcc","{}","61"]"#;
        let envelope = Envelope::parse(raw).unwrap();
        assert_eq!(
            envelope,
            Envelope::NegOpen {
                sub_id: "aabbcc".to_string(),
                filters: "{}".to_string(),
                init_msg: "61".to_string(),
            }
        );
    }

    #[test]
    fn unknown_tag_is_rejected_not_panicked() {
        assert!(Envelope::parse(br#"["BOGUS","x"]"#).is_err());
    }

    #[test]
    fn malformed_json_is_rejected_not_panicked() {
        assert!(Envelope::parse(b"not json").is_err());
    }

    #[test]
    fn missing_field_is_rejected() {
        assert!(Envelope::parse(br#"["NEG-MSG","aabbcc"]"#).is_err());
    }

    #[test]
    fn sub_id_strips_colons() {
        assert_eq!(sub_id_for_addr("aa:bb:cc:dd:ee:ff"), "aabbccddeeff");
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = Envelope::NegMsg {
            sub_id: "aabbcc".to_string(),
            hex: "61".to_string(),
        };
        let reparsed = Envelope::parse(envelope.to_json().as_bytes()).unwrap();
        assert_eq!(envelope, reparsed);
    }

    #[test]
    fn id_filters_round_trip() {
        let filters = IdFilters {
            ids: vec!["aa".to_string(), "bb".to_string()],
        };
        let json = filters.to_json();
        let reparsed = IdFilters::from_json(&json).unwrap();
        assert_eq!(reparsed.ids, filters.ids);
    }
}
