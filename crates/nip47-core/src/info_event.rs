//! The kind-13194 capability advertisement and its republish-on-change
//! tracking.

use nostr_sdk::{Event, EventBuilder, EventId, Kind, Tag, TagKind};

const ENCRYPTION_TAG: &str = "encryption";
const NOTIFICATIONS_TAG: &str = "notifications";

use crate::connection::Connection;
use crate::error::Error;
use crate::ledger;

/// The NIP-47 info event kind.
pub const INFO_KIND: Kind = Kind::WalletConnectInfo;

/// A content fingerprint of a connection's advertised capabilities, used
/// to decide whether a fresh kind-13194 event needs publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    methods: Vec<&'static str>,
    notifications_enabled: bool,
}

impl Fingerprint {
    /// Computes the fingerprint for a connection's current budget state.
    pub fn compute(connection: &Connection, notifications_enabled: bool) -> Self {
        Fingerprint {
            methods: ledger::eligible_methods(&connection.budget),
            notifications_enabled,
        }
    }
}

/// Tracks the last-published info event for a connection so it is only
/// republished when its content actually changes: on connection create, on
/// a budget change that alters eligible methods, and on plugin restart.
#[derive(Debug, Clone, Default)]
pub struct InfoEventState {
    last_event_id: Option<EventId>,
    last_fingerprint: Option<Fingerprint>,
}

impl InfoEventState {
    /// Builds and signs a fresh info event for the given connection state,
    /// updating the tracked fingerprint unconditionally. Callers that only
    /// want to publish on change should consult
    /// [`needs_republish`](Self::needs_republish) first.
    pub fn build(
        &mut self,
        connection: &Connection,
        notifications_enabled: bool,
    ) -> Result<Event, Error> {
        let fingerprint = Fingerprint::compute(connection, notifications_enabled);
        let content = fingerprint.methods.join(" ");
        let mut tags = vec![Tag::custom(
            TagKind::custom(ENCRYPTION_TAG),
            vec!["nip44_v2 nip04".to_string()],
        )];
        if notifications_enabled {
            tags.push(Tag::custom(
                TagKind::custom(NOTIFICATIONS_TAG),
                vec!["payment_received payment_sent".to_string()],
            ));
        }
        let event = EventBuilder::new(INFO_KIND, content, tags).to_event(&connection.wallet_keys())?;
        self.last_event_id = Some(event.id);
        self.last_fingerprint = Some(fingerprint);
        Ok(event)
    }

    /// Whether the connection's current capabilities differ from the last
    /// published fingerprint (or none has been published yet).
    pub fn needs_republish(&self, connection: &Connection, notifications_enabled: bool) -> bool {
        let current = Fingerprint::compute(connection, notifications_enabled);
        self.last_fingerprint.as_ref() != Some(&current)
    }

    /// The last-published event id, if any.
    pub fn last_event_id(&self) -> Option<EventId> {
        self.last_event_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BudgetConfig, LedgerEntry};
    use nostr_sdk::Keys;

    fn test_connection(budget: BudgetConfig) -> Connection {
        Connection {
            name: "alice".to_string(),
            wallet_secret: Keys::generate().secret_key().clone(),
            client_pubkey: Keys::generate().public_key(),
            client_secret: Keys::generate().secret_key().clone(),
            ledger: LedgerEntry::fresh(&budget, 0),
            budget,
            created_at: 0,
            revoked: false,
        }
    }

    #[test]
    fn republishes_after_budget_change_drops_payment_methods() {
        let mut state = InfoEventState::default();
        let funded = test_connection(BudgetConfig::Fixed { cap_msat: 3000 });
        state.build(&funded, true).unwrap();
        assert!(!state.needs_republish(&funded, true));

        let exhausted = test_connection(BudgetConfig::Fixed { cap_msat: 0 });
        assert!(state.needs_republish(&exhausted, true));
    }

    #[test]
    fn content_lists_read_methods_before_payment_methods_for_funded_connection() {
        let mut state = InfoEventState::default();
        let funded = test_connection(BudgetConfig::Fixed { cap_msat: 3000 });
        let event = state.build(&funded, true).unwrap();
        assert!(event.content.starts_with("make_invoice lookup_invoice list_transactions get_balance get_info pay_invoice multi_pay_invoice pay_keysend multi_pay_keysend make_offer lookup_offer"));
    }

    #[test]
    fn zero_cap_drops_payment_methods_from_content() {
        let mut state = InfoEventState::default();
        let exhausted = test_connection(BudgetConfig::Fixed { cap_msat: 0 });
        let event = state.build(&exhausted, true).unwrap();
        assert!(!event.content.contains("pay_invoice"));
        assert!(event.content.contains("make_invoice"));
    }
}
