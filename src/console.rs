//! Per-institution console state derived from one connection's feeds.
//!
//! A presenter only ever subscribes to its own institution's connection, so
//! a counterpart's events never show up in its log or ledger.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::stream::client::StreamingConnection;
use crate::stream::context::{Role, SessionContext};
use crate::stream::feed::EventFeed;
use crate::stream::proto::{LogMessage, Transaction};

/// Direction of a ledger row relative to the console's institution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incoming => f.write_str("Incoming"),
            Self::Outgoing => f.write_str("Outgoing"),
        }
    }
}

/// Rendered log console line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    /// CSS-style colour, eg `#00cc66`.
    pub color: String,
}

impl From<&LogMessage> for LogLine {
    fn from(message: &LogMessage) -> Self {
        Self {
            text: format!("{} {}", message.timestamp, message.message_unencrypted),
            color: format!("#{}", message.color_code),
        }
    }
}

/// Rendered transaction ledger row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerRow {
    pub timestamp: String,
    pub transaction_id: String,
    pub direction: Direction,
    pub details: String,
}

impl LedgerRow {
    fn new(transaction: &Transaction, vasp_id: &str) -> Self {
        let direction = if transaction.beneficiary_vasp_id == vasp_id {
            Direction::Incoming
        } else {
            Direction::Outgoing
        };
        Self {
            timestamp: transaction.timestamp.clone(),
            transaction_id: transaction.transaction_id.clone(),
            direction,
            details: format!(
                "{} => {}",
                transaction.originating_wallet, transaction.beneficiary_wallet
            ),
        }
    }
}

#[derive(Debug, Default)]
struct ConsoleState {
    logs: Vec<LogMessage>,
    ledger: Vec<Transaction>,
    scroll_anchor: Option<usize>,
    revision: u64,
}

/// Ordered log and ledger state for one institution.
#[derive(Clone, Debug)]
pub struct ConsolePresenter {
    vasp_id: String,
    role: Role,
    state: Arc<Mutex<ConsoleState>>,
}

impl ConsolePresenter {
    /// Subscribes to the connection's own log and transaction feeds.
    pub fn attach(connection: &StreamingConnection) -> Self {
        Self::from_feeds(
            connection.context(),
            connection.logs(),
            connection.transactions(),
        )
    }

    /// Subscribes to explicit feeds on behalf of `context`'s institution.
    pub fn from_feeds(
        context: &SessionContext,
        logs: &EventFeed<LogMessage>,
        transactions: &EventFeed<Transaction>,
    ) -> Self {
        let presenter = Self {
            vasp_id: context.vasp_id().to_string(),
            role: context.role(),
            state: Arc::new(Mutex::new(ConsoleState::default())),
        };

        let state = Arc::clone(&presenter.state);
        logs.subscribe(move |message: &LogMessage| {
            append_log(&state, message.clone());
        });

        let state = Arc::clone(&presenter.state);
        transactions.subscribe(move |transaction: &Transaction| {
            append_transaction(&state, transaction.clone());
        });

        presenter
    }

    pub fn vasp_id(&self) -> &str {
        &self.vasp_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Raw log messages in arrival order.
    pub fn log_messages(&self) -> Vec<LogMessage> {
        self.lock().logs.clone()
    }

    pub fn log_lines(&self) -> Vec<LogLine> {
        self.lock().logs.iter().map(LogLine::from).collect()
    }

    /// Index of the log line the view is scrolled to; always the newest.
    pub fn scroll_anchor(&self) -> Option<usize> {
        self.lock().scroll_anchor
    }

    pub fn ledger(&self) -> Vec<Transaction> {
        self.lock().ledger.clone()
    }

    pub fn ledger_rows(&self) -> Vec<LedgerRow> {
        self.lock()
            .ledger
            .iter()
            .map(|transaction| LedgerRow::new(transaction, &self.vasp_id))
            .collect()
    }

    /// Full record behind the ledger row at `index`.
    pub fn select_row(&self, index: usize) -> Option<Transaction> {
        self.lock().ledger.get(index).cloned()
    }

    /// Full record for the first ledger row with `transaction_id`.
    pub fn select_transaction(&self, transaction_id: &str) -> Option<Transaction> {
        self.lock()
            .ledger
            .iter()
            .find(|transaction| transaction.transaction_id == transaction_id)
            .cloned()
    }

    /// Increments on every append; lets a view poll for changes cheaply.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    fn lock(&self) -> MutexGuard<'_, ConsoleState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<ConsoleState>) -> MutexGuard<'_, ConsoleState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn append_log(state: &Mutex<ConsoleState>, message: LogMessage) {
    let mut state = lock_state(state);
    state.logs.push(message);
    let newest = state.logs.len() - 1;
    state.scroll_anchor = Some(newest);
    state.revision += 1;
}

fn append_transaction(state: &Mutex<ConsoleState>, transaction: Transaction) {
    let mut state = lock_state(state);
    state.ledger.push(transaction);
    state.revision += 1;
}

#[cfg(test)]
mod tests {
    use super::{ConsolePresenter, Direction, LedgerRow, LogLine};
    use crate::stream::context::{Role, SessionContext};
    use crate::stream::feed::EventFeed;
    use crate::stream::proto::{LogMessage, Transaction};

    fn log(text: &str) -> LogMessage {
        LogMessage {
            vasp_id: "B".to_string(),
            timestamp: "10:00:00".to_string(),
            message: String::new(),
            message_unencrypted: text.to_string(),
            color_code: "888888".to_string(),
        }
    }

    fn transaction(id: &str) -> Transaction {
        Transaction {
            timestamp: "10:00:01".to_string(),
            transaction_id: id.to_string(),
            originating_wallet: "W1".to_string(),
            originating_vasp_id: "A".to_string(),
            originating_vasp_display_name: "Alice".to_string(),
            beneficiary_wallet: "W2".to_string(),
            beneficiary_vasp_id: "B".to_string(),
            beneficiary_vasp_display_name: "Bob".to_string(),
            ivms101_payload: "{}".to_string(),
        }
    }

    #[test]
    fn ledger_direction_depends_on_console_institution() {
        let tx = transaction("t-1");
        assert_eq!(LedgerRow::new(&tx, "B").direction, Direction::Incoming);
        assert_eq!(LedgerRow::new(&tx, "A").direction, Direction::Outgoing);
        assert_eq!(LedgerRow::new(&tx, "A").details, "W1 => W2");
        assert_eq!(Direction::Incoming.to_string(), "Incoming");
    }

    #[test]
    fn log_line_joins_timestamp_and_plaintext() {
        let message = LogMessage {
            vasp_id: "A".to_string(),
            timestamp: "10:00:00".to_string(),
            message: "ciphertext".to_string(),
            message_unencrypted: "received transfer request".to_string(),
            color_code: "00cc66".to_string(),
        };
        assert_eq!(
            LogLine::from(&message),
            LogLine {
                text: "10:00:00 received transfer request".to_string(),
                color: "#00cc66".to_string(),
            }
        );
    }

    #[test]
    fn appends_in_arrival_order_and_scrolls_to_newest() {
        let logs = EventFeed::new();
        let transactions = EventFeed::new();
        let context = SessionContext::new("ctx", "B", Role::Beneficiary);

        logs.publish(&log("before attach"));
        let presenter = ConsolePresenter::from_feeds(&context, &logs, &transactions);
        assert_eq!(presenter.scroll_anchor(), None);

        logs.publish(&log("first"));
        logs.publish(&log("second"));
        logs.publish(&log("third"));

        let texts: Vec<String> = presenter
            .log_messages()
            .into_iter()
            .map(|message| message.message_unencrypted)
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(presenter.scroll_anchor(), Some(2));
        assert_eq!(presenter.revision(), 3);
        assert_eq!(presenter.role(), Role::Beneficiary);
    }

    #[test]
    fn selecting_a_row_returns_the_full_record() {
        let logs = EventFeed::new();
        let transactions = EventFeed::new();
        let context = SessionContext::new("ctx", "B", Role::Beneficiary);
        let presenter = ConsolePresenter::from_feeds(&context, &logs, &transactions);

        let mut second = transaction("t-2");
        second.ivms101_payload = r#"{"beneficiary":{"beneficiaryPersons":[]}}"#.to_string();
        transactions.publish(&transaction("t-1"));
        transactions.publish(&second);

        let rows = presenter.ledger_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].transaction_id, "t-2");
        assert_eq!(rows[1].direction, Direction::Incoming);
        assert_eq!(presenter.select_row(1), Some(second.clone()));
        assert_eq!(presenter.select_transaction("t-2"), Some(second));
        assert_eq!(presenter.select_transaction("t-9"), None);
        assert_eq!(presenter.select_row(5), None);
    }

    #[test]
    fn same_transaction_on_two_consoles_is_not_merged() {
        let originator_logs = EventFeed::new();
        let originator_transactions = EventFeed::new();
        let beneficiary_logs = EventFeed::new();
        let beneficiary_transactions = EventFeed::new();

        let originator = ConsolePresenter::from_feeds(
            &SessionContext::new("ctx", "A", Role::Originator),
            &originator_logs,
            &originator_transactions,
        );
        let beneficiary = ConsolePresenter::from_feeds(
            &SessionContext::new("ctx", "B", Role::Beneficiary),
            &beneficiary_logs,
            &beneficiary_transactions,
        );

        originator_transactions.publish(&transaction("t-1"));
        beneficiary_transactions.publish(&transaction("t-1"));

        assert_eq!(originator.ledger_rows().len(), 1);
        assert_eq!(beneficiary.ledger_rows().len(), 1);
        assert_eq!(originator.ledger_rows()[0].direction, Direction::Outgoing);
        assert_eq!(beneficiary.ledger_rows()[0].direction, Direction::Incoming);
        assert!(originator.log_lines().is_empty());
    }
}
