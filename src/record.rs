use std::convert::TryFrom;
use std::str::FromStr;

use crate::error::Error;

/// The disposition reported by a recipient's mail agent in an MDN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispositionType {
    Processed,
    Dispatched,
    Error,
    Denied,
}

impl FromStr for DispositionType {
    type Err = Error;

    /// Accepts the bare disposition type (`processed`) or a full
    /// disposition field value
    /// (`automatic-action/MDN-sent-automatically;processed/error`), in
    /// which case the type after the last `;` is used and any modifier
    /// after `/` is ignored.
    fn from_str(s: &str) -> Result<DispositionType, Error> {
        let field = s.rsplit(';').next().unwrap_or(s);
        let kind = field.split('/').next().unwrap_or(field).trim();
        match &*kind.to_ascii_lowercase() {
            "processed" => Ok(DispositionType::Processed),
            "dispatched" => Ok(DispositionType::Dispatched),
            "error" => Ok(DispositionType::Error),
            "denied" => Ok(DispositionType::Denied),
            _ => Err(Error::MalformedRecord(format!(
                "unknown disposition {:?}",
                s
            ))),
        }
    }
}

/// The action reported by a transport in a DSN (RFC 3464)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryAction {
    Failed,
    Delayed,
    Relayed,
    Delivered,
    Expanded,
}

impl FromStr for DeliveryAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<DeliveryAction, Error> {
        match &*s.trim().to_ascii_lowercase() {
            "failed" => Ok(DeliveryAction::Failed),
            "delayed" => Ok(DeliveryAction::Delayed),
            "relayed" => Ok(DeliveryAction::Relayed),
            "delivered" => Ok(DeliveryAction::Delivered),
            "expanded" => Ok(DeliveryAction::Expanded),
            _ => Err(Error::MalformedRecord(format!(
                "unknown delivery action {:?}",
                s
            ))),
        }
    }
}

/// One normalised unit of input to the `Monitor`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationRecord {
    /// The message that fans out to its recipients
    Original {
        id: String,
        recipients: Vec<String>,
    },

    /// A message disposition notification (RFC 8098) from one recipient
    Disposition {
        id: String,
        correlation_id: String,
        recipients: Vec<String>,
        disposition: DispositionType,
    },

    /// A delivery status notification (RFC 3464), possibly covering many
    /// recipients at once
    DeliveryStatus {
        id: String,
        correlation_id: String,
        recipients: Vec<String>,
        action: DeliveryAction,
    },
}

impl NotificationRecord {
    pub fn id(&self) -> &str {
        match *self {
            NotificationRecord::Original { ref id, .. }
            | NotificationRecord::Disposition { ref id, .. }
            | NotificationRecord::DeliveryStatus { ref id, .. } => id,
        }
    }

    /// The id of the Original record this one belongs to. For an Original,
    /// that is its own id.
    pub fn correlation_id(&self) -> &str {
        match *self {
            NotificationRecord::Original { ref id, .. } => id,
            NotificationRecord::Disposition {
                ref correlation_id, ..
            }
            | NotificationRecord::DeliveryStatus {
                ref correlation_id, ..
            } => correlation_id,
        }
    }

    pub fn recipients(&self) -> &[String] {
        match *self {
            NotificationRecord::Original { ref recipients, .. }
            | NotificationRecord::Disposition { ref recipients, .. }
            | NotificationRecord::DeliveryStatus { ref recipients, .. } => recipients,
        }
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.correlation_id().trim().is_empty() {
            return Err(Error::MalformedRecord(format!(
                "record {:?} has no correlation id",
                self.id()
            )));
        }
        if self.recipients().is_empty() {
            return Err(Error::MalformedRecord(format!(
                "record {:?} names no recipients",
                self.id()
            )));
        }
        Ok(())
    }
}

/// A record in the loose shape an upstream normaliser tends to produce:
/// every field optional and the kind, disposition and action carried as
/// strings. Convert with `NotificationRecord::try_from`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    /// `IMF` for an Original, `MDN` or `DSN` for a notification
    pub message_type: String,
    pub message_id: String,
    /// The Original's message id; empty for an Original
    pub parent_message_id: String,
    /// Comma separated recipient addresses
    pub recipients: String,
    pub disposition: Option<String>,
    pub dsn_action: Option<String>,
}

impl TryFrom<RawRecord> for NotificationRecord {
    type Error = Error;

    fn try_from(raw: RawRecord) -> Result<NotificationRecord, Error> {
        let recipients: Vec<String> = raw
            .recipients
            .split(',')
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(|r| r.to_owned())
            .collect();

        let record = match &*raw.message_type.trim().to_ascii_uppercase() {
            "IMF" => NotificationRecord::Original {
                id: raw.message_id,
                recipients,
            },
            "MDN" => {
                let disposition = match raw.disposition {
                    Some(ref d) => d.parse()?,
                    None => {
                        return Err(Error::MalformedRecord(format!(
                            "MDN {:?} has no disposition",
                            raw.message_id
                        )))
                    }
                };
                NotificationRecord::Disposition {
                    id: raw.message_id,
                    correlation_id: raw.parent_message_id,
                    recipients,
                    disposition,
                }
            }
            "DSN" => {
                let action = match raw.dsn_action {
                    Some(ref a) => a.parse()?,
                    None => {
                        return Err(Error::MalformedRecord(format!(
                            "DSN {:?} has no action",
                            raw.message_id
                        )))
                    }
                };
                NotificationRecord::DeliveryStatus {
                    id: raw.message_id,
                    correlation_id: raw.parent_message_id,
                    recipients,
                    action,
                }
            }
            other => {
                return Err(Error::MalformedRecord(format!(
                    "unknown message type {:?}",
                    other
                )))
            }
        };

        record.check()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_field_values() {
        assert_eq!(
            "Processed".parse::<DispositionType>().unwrap(),
            DispositionType::Processed
        );
        assert_eq!(
            "automatic-action/MDN-sent-automatically;dispatched"
                .parse::<DispositionType>()
                .unwrap(),
            DispositionType::Dispatched
        );
        assert_eq!(
            "manual-action/MDN-sent-manually; processed/error"
                .parse::<DispositionType>()
                .unwrap(),
            DispositionType::Processed
        );
        assert!("displayed".parse::<DispositionType>().is_err());
    }

    #[test]
    fn test_raw_dsn() {
        let raw = RawRecord {
            message_type: "dsn".to_owned(),
            message_id: "dsn-1".to_owned(),
            parent_message_id: "orig-1".to_owned(),
            recipients: "a@example.com, b@example.com".to_owned(),
            disposition: None,
            dsn_action: Some("FAILED".to_owned()),
        };
        match NotificationRecord::try_from(raw).unwrap() {
            NotificationRecord::DeliveryStatus {
                correlation_id,
                recipients,
                action,
                ..
            } => {
                assert_eq!(correlation_id, "orig-1");
                assert_eq!(recipients, vec!["a@example.com", "b@example.com"]);
                assert_eq!(action, DeliveryAction::Failed);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_raw_rejects_malformed() {
        let no_parent = RawRecord {
            message_type: "MDN".to_owned(),
            message_id: "mdn-1".to_owned(),
            recipients: "a@example.com".to_owned(),
            disposition: Some("processed".to_owned()),
            ..Default::default()
        };
        assert!(NotificationRecord::try_from(no_parent).is_err());

        let bad_action = RawRecord {
            message_type: "DSN".to_owned(),
            message_id: "dsn-1".to_owned(),
            parent_message_id: "orig-1".to_owned(),
            recipients: "a@example.com".to_owned(),
            dsn_action: Some("bounced".to_owned()),
            ..Default::default()
        };
        assert!(NotificationRecord::try_from(bad_action).is_err());

        let unknown_type = RawRecord {
            message_type: "SMS".to_owned(),
            message_id: "x".to_owned(),
            recipients: "a@example.com".to_owned(),
            ..Default::default()
        };
        assert!(NotificationRecord::try_from(unknown_type).is_err());
    }
}
