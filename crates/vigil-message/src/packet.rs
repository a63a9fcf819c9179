//! The accepted view of a message.
//!
//! A [`Packet`] only hands out keys that the accepting [`Rules`](crate::Rules)
//! declared. Reading anything else is a [`FieldError::Undeclared`], which keeps
//! a listener's field usage visible in its rule set.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::FieldError;
use crate::message::{Message, Node};

/// A message that passed a river's rules.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    message: &'a Message,
    declared: &'a BTreeSet<String>,
}

impl<'a> Packet<'a> {
    pub(crate) const fn new(message: &'a Message, declared: &'a BTreeSet<String>) -> Self {
        Self { message, declared }
    }

    /// The full underlying message, e.g. for logging.
    pub const fn message(&self) -> &'a Message {
        self.message
    }

    fn declared(&self, path: &str) -> Result<Node<'a>, FieldError> {
        if self.declared.contains(path) {
            Ok(self.message.root())
        } else {
            Err(FieldError::Undeclared {
                path: path.to_owned(),
            })
        }
    }

    /// Resolve a declared key. `Ok(None)` means declared but absent.
    pub fn get(&self, path: &str) -> Result<Option<Node<'a>>, FieldError> {
        Ok(self.declared(path)?.get(path))
    }

    /// Read a declared string field.
    pub fn text(&self, path: &str) -> Result<&'a str, FieldError> {
        self.declared(path)?.text(path)
    }

    /// Read a declared boolean field.
    pub fn boolean(&self, path: &str) -> Result<bool, FieldError> {
        self.declared(path)?.boolean(path)
    }

    /// Read a declared integer field.
    pub fn integer(&self, path: &str) -> Result<i64, FieldError> {
        self.declared(path)?.integer(path)
    }

    /// Read a declared numeric field.
    pub fn number(&self, path: &str) -> Result<f64, FieldError> {
        self.declared(path)?.number(path)
    }

    /// Read a declared date-time field.
    pub fn datetime(&self, path: &str) -> Result<NaiveDateTime, FieldError> {
        self.declared(path)?.datetime(path)
    }

    /// Read a declared date-time field that may be absent.
    pub fn optional_datetime(&self, path: &str) -> Result<Option<NaiveDateTime>, FieldError> {
        match self.datetime(path) {
            Ok(value) => Ok(Some(value)),
            Err(FieldError::Missing { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read a declared calendar date field.
    pub fn date(&self, path: &str) -> Result<NaiveDate, FieldError> {
        self.declared(path)?.date(path)
    }

    /// Read a declared array field. Elements are plain [`Node`]s and are not
    /// subject to the declaration check.
    pub fn elements(&self, path: &str) -> Result<Vec<Node<'a>>, FieldError> {
        self.declared(path)?.elements(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use crate::rules::{Rules, Verdict};
    use crate::ValueKind;

    use super::*;

    #[test]
    fn only_declared_keys_are_readable() {
        let message = Message::from_value(json!({
            "@event_name": "reminder",
            "periodId": "p-1",
            "secret": "nope",
            "hasWarnings": true
        }))
        .unwrap();
        let rules = Rules::new()
            .demand_value("@event_name", "reminder")
            .require_key("periodId")
            .interested_in(&["hasWarnings", "deadline"])
            .require_typed("deadline", ValueKind::DateTime);
        let Verdict::Accepted(packet) = rules.evaluate(&message) else {
            panic!("expected packet to be accepted");
        };

        assert_eq!(packet.text("periodId"), Ok("p-1"));
        assert_eq!(packet.boolean("hasWarnings"), Ok(true));
        assert_eq!(packet.optional_datetime("deadline"), Ok(None));
        assert_eq!(
            packet.text("secret"),
            Err(FieldError::Undeclared {
                path: "secret".to_owned()
            })
        );
    }
}
