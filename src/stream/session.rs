//! Side-by-side exchange session between an originator and a beneficiary.
//!
//! `ExchangeSession` owns one streaming connection and console per selected
//! role. Every selection change closes the affected connection (which
//! discards its feeds) before a replacement is opened, so a stale channel can
//! never feed a newly selected institution's console.

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::console::ConsolePresenter;
use crate::directory::VaspDetails;
use crate::dispatch::{Notifier, TransactionRequestDispatcher, TransferDraft, ValidationError};
use crate::lifecycle::TransferTracker;
use crate::stream::client::{SendOutcome, StreamEndpoint, StreamingConnection};
use crate::stream::context::{Role, SessionContext};
use crate::stream::proto::TransactionRequest;

/// Selection errors. These are programming or input errors, not transport
/// failures; transport failures never surface here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown vasp id: {0}")]
    UnknownVasp(String),

    #[error("select an originating VASP first")]
    NoOriginator,

    #[error("{0} cannot be the beneficiary of its own transfer")]
    InvalidBeneficiary(String),
}

/// Send-form fields the user fills in; the session supplies the rest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferForm {
    pub originator_wallet_id: Option<String>,
    pub beneficiary_wallet_id: Option<String>,
    pub crypto_type: Option<String>,
    pub amount: String,
}

/// One selected institution: its details, live channel, and console.
#[derive(Debug)]
pub struct ConsoleSlot {
    details: VaspDetails,
    connection: StreamingConnection,
    presenter: ConsolePresenter,
}

impl ConsoleSlot {
    fn open(details: VaspDetails, context: SessionContext, endpoint: &StreamEndpoint) -> Self {
        let connection = StreamingConnection::open(context, endpoint);
        let presenter = ConsolePresenter::attach(&connection);
        Self {
            details,
            connection,
            presenter,
        }
    }

    pub fn details(&self) -> &VaspDetails {
        &self.details
    }

    pub fn connection(&self) -> &StreamingConnection {
        &self.connection
    }

    pub fn presenter(&self) -> &ConsolePresenter {
        &self.presenter
    }

    fn close(self) {
        self.connection.close();
    }
}

/// Two-console session sharing one context id.
#[derive(Debug)]
pub struct ExchangeSession<N> {
    session_id: String,
    endpoint: StreamEndpoint,
    vasps: Vec<VaspDetails>,
    originator: Option<ConsoleSlot>,
    beneficiary: Option<ConsoleSlot>,
    dispatcher: TransactionRequestDispatcher<N>,
    tracker: TransferTracker,
}

impl<N: Notifier> ExchangeSession<N> {
    /// Starts a session with a fresh random context id.
    pub fn new(endpoint: StreamEndpoint, vasps: Vec<VaspDetails>, notifier: N) -> Self {
        Self::with_session_id(Uuid::new_v4().to_string(), endpoint, vasps, notifier)
    }

    pub fn with_session_id(
        session_id: impl Into<String>,
        endpoint: StreamEndpoint,
        vasps: Vec<VaspDetails>,
        notifier: N,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            endpoint,
            vasps,
            originator: None,
            beneficiary: None,
            dispatcher: TransactionRequestDispatcher::new(notifier),
            tracker: TransferTracker::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn vasps(&self) -> &[VaspDetails] {
        &self.vasps
    }

    pub fn originator(&self) -> Option<&ConsoleSlot> {
        self.originator.as_ref()
    }

    pub fn beneficiary(&self) -> Option<&ConsoleSlot> {
        self.beneficiary.as_ref()
    }

    pub fn tracker(&self) -> &TransferTracker {
        &self.tracker
    }

    pub fn dispatcher(&self) -> &TransactionRequestDispatcher<N> {
        &self.dispatcher
    }

    /// Institutions that may be picked as beneficiary.
    pub fn target_vasps(&self) -> Vec<&VaspDetails> {
        let Some(originator) = self.originator.as_ref() else {
            return Vec::new();
        };
        self.vasps
            .iter()
            .filter(|vasp| vasp.vasp_id != originator.details.vasp_id)
            .collect()
    }

    /// Selects the originating institution, replacing both consoles.
    pub fn select_originator(&mut self, vasp_id: &str) -> Result<&ConsoleSlot, SessionError> {
        let details = self.find_vasp(vasp_id)?.clone();
        self.clear_originator();

        let slot = self.open_slot(details, Role::Originator);
        Ok(&*self.originator.insert(slot))
    }

    /// Selects the beneficiary, replacing only the beneficiary console.
    pub fn select_beneficiary(&mut self, vasp_id: &str) -> Result<&ConsoleSlot, SessionError> {
        let originator_id = self
            .originator
            .as_ref()
            .map(|slot| slot.details.vasp_id.clone())
            .ok_or(SessionError::NoOriginator)?;
        if originator_id == vasp_id {
            return Err(SessionError::InvalidBeneficiary(vasp_id.to_string()));
        }
        let details = self.find_vasp(vasp_id)?.clone();
        self.clear_beneficiary();

        let slot = self.open_slot(details, Role::Beneficiary);
        Ok(&*self.beneficiary.insert(slot))
    }

    /// Clears the originator; the beneficiary goes with it.
    pub fn clear_originator(&mut self) {
        self.clear_beneficiary();
        if let Some(slot) = self.originator.take() {
            info!(event = "originator_cleared", vasp_id = %slot.details.vasp_id);
            slot.close();
        }
    }

    pub fn clear_beneficiary(&mut self) {
        if let Some(slot) = self.beneficiary.take() {
            info!(event = "beneficiary_cleared", vasp_id = %slot.details.vasp_id);
            slot.close();
        }
    }

    /// Builds a draft from the current selection and `form`.
    pub fn draft(&self, form: &TransferForm) -> TransferDraft {
        TransferDraft {
            context_id: self.session_id.clone(),
            originator_vasp_id: self
                .originator
                .as_ref()
                .map(|slot| slot.details.vasp_id.clone())
                .unwrap_or_default(),
            originator_wallet_id: form.originator_wallet_id.clone(),
            beneficiary_vasp_id: self
                .beneficiary
                .as_ref()
                .map(|slot| slot.details.vasp_id.clone()),
            beneficiary_wallet_id: form.beneficiary_wallet_id.clone(),
            crypto_type: form.crypto_type.clone(),
            amount: form.amount.clone(),
        }
    }

    /// Validates `form` and sends it over the originator's connection only.
    ///
    /// A refused form alerts the notifier and nothing is sent. Without a
    /// selected originator the form is refused as missing a beneficiary,
    /// since no beneficiary can be selected either.
    pub fn send_transfer(
        &self,
        form: &TransferForm,
    ) -> Result<(TransactionRequest, SendOutcome), ValidationError> {
        let draft = self.draft(form);
        let Some(originator) = self.originator.as_ref() else {
            let err = ValidationError::MissingBeneficiaryVasp;
            self.dispatcher.notifier().alert(&err.to_string());
            return Err(err);
        };

        let (request, outcome) = self.dispatcher.dispatch(&draft, &originator.connection)?;
        if outcome == SendOutcome::Forwarded {
            self.tracker.record_sent(request.clone());
        }
        Ok((request, outcome))
    }

    fn find_vasp(&self, vasp_id: &str) -> Result<&VaspDetails, SessionError> {
        self.vasps
            .iter()
            .find(|vasp| vasp.vasp_id == vasp_id)
            .ok_or_else(|| SessionError::UnknownVasp(vasp_id.to_string()))
    }

    fn open_slot(&self, details: VaspDetails, role: Role) -> ConsoleSlot {
        let context = SessionContext::new(self.session_id.clone(), details.vasp_id.clone(), role);
        info!(
            event = "vasp_selected",
            vasp_id = %details.vasp_id,
            role = %role,
            context_id = %self.session_id
        );
        let slot = ConsoleSlot::open(details, context, &self.endpoint);
        self.tracker.watch(role, slot.connection.transactions());
        slot
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::{ExchangeSession, SessionError, TransferForm};
    use crate::directory::{UserWallet, VaspDetails};
    use crate::dispatch::{Notifier, ValidationError};
    use crate::stream::client::{ConnectionState, SendOutcome, StreamEndpoint};
    use crate::stream::context::Role;

    #[derive(Default)]
    struct RecordingNotifier {
        alerts: RefCell<Vec<String>>,
    }

    impl Notifier for &RecordingNotifier {
        fn alert(&self, message: &str) {
            self.alerts.borrow_mut().push(message.to_string());
        }
    }

    fn vasp(id: &str) -> VaspDetails {
        VaspDetails {
            vasp_id: id.to_string(),
            display_name: format!("{id} VASP"),
            description: String::new(),
            trisa_ds_entry: None,
            private_key: String::new(),
            public_key: String::new(),
            user_wallets: vec![UserWallet {
                user_wallet_id: format!("{id}-wallet"),
                wallet_address: format!("user@{id}.example"),
            }],
        }
    }

    fn unreachable() -> StreamEndpoint {
        StreamEndpoint::new().with_endpoint("http://127.0.0.1:1")
    }

    fn form(amount: &str) -> TransferForm {
        TransferForm {
            originator_wallet_id: Some("W1".to_string()),
            beneficiary_wallet_id: Some("W2".to_string()),
            crypto_type: Some("BTC".to_string()),
            amount: amount.to_string(),
        }
    }

    #[tokio::test]
    async fn selection_rules_follow_roles() {
        let notifier = RecordingNotifier::default();
        let mut session = ExchangeSession::with_session_id(
            "session-1",
            unreachable(),
            vec![vasp("A"), vasp("B"), vasp("C")],
            &notifier,
        );

        assert_eq!(
            session.select_beneficiary("B").err(),
            Some(SessionError::NoOriginator)
        );
        assert!(session.target_vasps().is_empty());
        assert_eq!(
            session.select_originator("Z").err(),
            Some(SessionError::UnknownVasp("Z".to_string()))
        );

        let slot = session.select_originator("A").expect("select originator");
        assert_eq!(slot.connection().context().role(), Role::Originator);
        assert_eq!(slot.connection().context().session_id(), "session-1");

        let targets: Vec<&str> = session
            .target_vasps()
            .into_iter()
            .map(|vasp| vasp.vasp_id.as_str())
            .collect();
        assert_eq!(targets, vec!["B", "C"]);
        assert_eq!(
            session.select_beneficiary("A").err(),
            Some(SessionError::InvalidBeneficiary("A".to_string()))
        );

        let slot = session.select_beneficiary("B").expect("select beneficiary");
        assert_eq!(slot.connection().context().role(), Role::Beneficiary);
        assert_eq!(slot.presenter().vasp_id(), "B");
    }

    #[tokio::test]
    async fn swapping_beneficiary_closes_the_previous_connection() {
        let notifier = RecordingNotifier::default();
        let mut session =
            ExchangeSession::new(unreachable(), vec![vasp("A"), vasp("B"), vasp("C")], &notifier);
        session.select_originator("A").expect("originator");
        session.select_beneficiary("B").expect("beneficiary");

        let old_logs = session
            .beneficiary()
            .map(|slot| slot.connection().logs().clone())
            .expect("beneficiary slot");
        let old_state = session
            .beneficiary()
            .map(|slot| slot.connection().state_changes())
            .expect("beneficiary slot");

        session.select_beneficiary("C").expect("swap beneficiary");

        assert!(old_logs.is_closed());
        assert_eq!(*old_state.borrow(), ConnectionState::Closed);
        assert_eq!(
            session.beneficiary().map(|slot| slot.details().vasp_id.as_str()),
            Some("C")
        );
        assert!(!session
            .beneficiary()
            .map(|slot| slot.connection().logs().is_closed())
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn clearing_originator_clears_both_sides() {
        let notifier = RecordingNotifier::default();
        let mut session =
            ExchangeSession::new(unreachable(), vec![vasp("A"), vasp("B")], &notifier);
        session.select_originator("A").expect("originator");
        session.select_beneficiary("B").expect("beneficiary");
        let originator_feed = session
            .originator()
            .map(|slot| slot.connection().transactions().clone())
            .expect("originator slot");

        session.clear_originator();

        assert!(session.originator().is_none());
        assert!(session.beneficiary().is_none());
        assert!(originator_feed.is_closed());
    }

    #[tokio::test]
    async fn invalid_amount_never_reaches_the_connection() {
        let notifier = RecordingNotifier::default();
        let mut session =
            ExchangeSession::new(unreachable(), vec![vasp("A"), vasp("B")], &notifier);
        session.select_originator("A").expect("originator");
        session.select_beneficiary("B").expect("beneficiary");

        assert_eq!(
            session.send_transfer(&form("abc")),
            Err(ValidationError::InvalidAmount)
        );
        assert!(session.tracker().sent().is_empty());
        assert_eq!(
            *notifier.alerts.borrow(),
            vec!["Enter a transaction amount".to_string()]
        );
    }

    #[tokio::test]
    async fn send_without_beneficiary_is_refused() {
        let notifier = RecordingNotifier::default();
        let mut session =
            ExchangeSession::new(unreachable(), vec![vasp("A"), vasp("B")], &notifier);

        assert_eq!(
            session.send_transfer(&form("0.5")),
            Err(ValidationError::MissingBeneficiaryVasp)
        );
        session.select_originator("A").expect("originator");
        assert_eq!(
            session.send_transfer(&form("0.5")),
            Err(ValidationError::MissingBeneficiaryVasp)
        );
        assert_eq!(notifier.alerts.borrow().len(), 2);
    }

    #[tokio::test]
    async fn valid_send_before_handshake_is_dropped_silently() {
        let notifier = RecordingNotifier::default();
        let mut session = ExchangeSession::with_session_id(
            "session-1",
            unreachable(),
            vec![vasp("A"), vasp("B")],
            &notifier,
        );
        session.select_originator("A").expect("originator");
        session.select_beneficiary("B").expect("beneficiary");

        let (request, outcome) = session.send_transfer(&form("0.5")).expect("valid form");

        assert_eq!(outcome, SendOutcome::Dropped);
        assert_eq!(request.context_id, "session-1");
        assert_eq!(request.originator_vasp_id, "A");
        assert_eq!(request.beneficiary_vasp_id, "B");
        assert!(notifier.alerts.borrow().is_empty());
        assert!(session.tracker().sent().is_empty());
    }
}
