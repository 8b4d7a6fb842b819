//! Forward-only lifecycle shared by orders and requests.
//!
//! Both documents move through the same four stages; only the name of the final stage differs
//! (an order is *collected*, a request is *paid*). The transition table lives here once and each
//! document status maps onto a [`Stage`].

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Draft,
    Generated,
    Sent,
    Settled,
}

impl Stage {
    /// Whether `self -> next` is a legal move. Regenerating an unsent document is allowed.
    pub const fn permits(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Draft, Stage::Generated)
                | (Stage::Generated, Stage::Generated)
                | (Stage::Draft, Stage::Sent)
                | (Stage::Generated, Stage::Sent)
                | (Stage::Sent, Stage::Settled)
        )
    }
}

/// Status enum of a billing document that follows the shared [`Stage`] lifecycle.
pub trait DocumentStatus: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Document kind used in error messages and logs.
    const KIND: &'static str;

    fn stage(self) -> Stage;
    fn from_stage(stage: Stage) -> Self;
    fn label(self) -> &'static str;

    fn is_sent(self) -> bool {
        self.stage() >= Stage::Sent
    }

    /// Unsent documents may still be edited or deleted.
    fn is_editable(self) -> bool {
        self.stage() < Stage::Sent
    }

    fn advance(self, next: Stage) -> Result<Self, TransitionError> {
        if self.stage().permits(next) {
            Ok(Self::from_stage(next))
        } else {
            Err(TransitionError {
                document: Self::KIND,
                from: self.label(),
                to: Self::from_stage(next).label(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{document} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub document: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Draft,
    Generated,
    Sent,
    Collected,
}

impl DocumentStatus for OrderStatus {
    const KIND: &'static str = "order";

    fn stage(self) -> Stage {
        match self {
            OrderStatus::Draft => Stage::Draft,
            OrderStatus::Generated => Stage::Generated,
            OrderStatus::Sent => Stage::Sent,
            OrderStatus::Collected => Stage::Settled,
        }
    }

    fn from_stage(stage: Stage) -> Self {
        match stage {
            Stage::Draft => OrderStatus::Draft,
            Stage::Generated => OrderStatus::Generated,
            Stage::Sent => OrderStatus::Sent,
            Stage::Settled => OrderStatus::Collected,
        }
    }

    fn label(self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Generated => "generated",
            OrderStatus::Sent => "sent",
            OrderStatus::Collected => "collected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Draft,
    Generated,
    Sent,
    Paid,
}

impl DocumentStatus for RequestStatus {
    const KIND: &'static str = "request";

    fn stage(self) -> Stage {
        match self {
            RequestStatus::Draft => Stage::Draft,
            RequestStatus::Generated => Stage::Generated,
            RequestStatus::Sent => Stage::Sent,
            RequestStatus::Paid => Stage::Settled,
        }
    }

    fn from_stage(stage: Stage) -> Self {
        match stage {
            Stage::Draft => RequestStatus::Draft,
            Stage::Generated => RequestStatus::Generated,
            Stage::Sent => RequestStatus::Sent,
            Stage::Settled => RequestStatus::Paid,
        }
    }

    fn label(self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Generated => "generated",
            RequestStatus::Sent => "sent",
            RequestStatus::Paid => "paid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_move_forward_only() {
        let sent = OrderStatus::Draft.advance(Stage::Sent).expect("draft -> sent");
        assert_eq!(sent, OrderStatus::Sent);
        assert!(sent.is_sent());
        assert!(!sent.is_editable());

        let collected = sent.advance(Stage::Settled).expect("sent -> collected");
        assert_eq!(collected, OrderStatus::Collected);
        assert!(collected.is_sent());

        let err = collected.advance(Stage::Sent).expect_err("no un-collect");
        assert_eq!(err.to_string(), "order cannot move from collected to sent");
    }

    #[test]
    fn settling_requires_sent() {
        let err = RequestStatus::Generated
            .advance(Stage::Settled)
            .expect_err("generated -> paid is rejected");
        assert_eq!(
            err,
            TransitionError {
                document: "request",
                from: "generated",
                to: "paid",
            }
        );
        assert!(RequestStatus::Draft.advance(Stage::Settled).is_err());
    }

    #[test]
    fn unsent_documents_can_be_regenerated() {
        assert_eq!(
            RequestStatus::Generated.advance(Stage::Generated),
            Ok(RequestStatus::Generated)
        );
        assert!(OrderStatus::Sent.advance(Stage::Generated).is_err());
        assert!(OrderStatus::Sent.advance(Stage::Sent).is_err());
    }

    #[test]
    fn serializes_as_lowercase_labels() {
        let json = serde_json::to_string(&RequestStatus::Paid).expect("serializes");
        assert_eq!(json, "\"paid\"");
        for status in [
            OrderStatus::Draft,
            OrderStatus::Generated,
            OrderStatus::Sent,
            OrderStatus::Collected,
        ] {
            let json = serde_json::to_string(&status).expect("serializes");
            assert_eq!(json, format!("\"{}\"", status.label()));
        }
    }
}
