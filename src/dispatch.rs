//! Transfer validation and dispatch over the originator's connection.

use thiserror::Error;
use tracing::{info, warn};

use crate::stream::client::{SendOutcome, TransactionSink};
use crate::stream::proto::TransactionRequest;

/// Currencies offered by the send form.
pub const SUPPORTED_CURRENCIES: [&str; 2] = ["BTC", "ETH"];

/// Blocking user notification, invoked synchronously when a send is refused.
pub trait Notifier {
    fn alert(&self, message: &str);
}

/// Notifier that writes refusals to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, message: &str) {
        warn!(event = "transfer_rejected", message);
    }
}

/// Raw form state for one send action, before validation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferDraft {
    pub context_id: String,
    pub originator_vasp_id: String,
    pub originator_wallet_id: Option<String>,
    pub beneficiary_vasp_id: Option<String>,
    pub beneficiary_wallet_id: Option<String>,
    pub crypto_type: Option<String>,
    /// Amount exactly as typed by the user.
    pub amount: String,
}

/// The first precondition a draft failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Select a beneficiary VASP to start transaction")]
    MissingBeneficiaryVasp,

    #[error("Select an originating wallet for transaction.")]
    MissingOriginatorWallet,

    #[error("Enter a transaction amount")]
    InvalidAmount,

    #[error("Select a beneficiary wallet")]
    MissingBeneficiaryWallet,

    #[error("Select a currency type")]
    MissingCurrency,
}

impl ValidationError {
    /// Name of the form field the error refers to.
    pub fn field(&self) -> &'static str {
        match self {
            Self::MissingBeneficiaryVasp => "beneficiary_vasp_id",
            Self::MissingOriginatorWallet => "originator_wallet_id",
            Self::InvalidAmount => "amount",
            Self::MissingBeneficiaryWallet => "beneficiary_wallet_id",
            Self::MissingCurrency => "crypto_type",
        }
    }
}

impl TransferDraft {
    /// Builds the wire request, failing on the first unmet precondition.
    pub fn validate(&self) -> Result<TransactionRequest, ValidationError> {
        let beneficiary_vasp_id =
            present(&self.beneficiary_vasp_id).ok_or(ValidationError::MissingBeneficiaryVasp)?;
        let originator_wallet_id =
            present(&self.originator_wallet_id).ok_or(ValidationError::MissingOriginatorWallet)?;
        let amount = parse_amount(&self.amount).ok_or(ValidationError::InvalidAmount)?;
        let beneficiary_wallet_id = present(&self.beneficiary_wallet_id)
            .ok_or(ValidationError::MissingBeneficiaryWallet)?;
        let crypto_type = present(&self.crypto_type).ok_or(ValidationError::MissingCurrency)?;

        Ok(TransactionRequest {
            context_id: self.context_id.clone(),
            originator_vasp_id: self.originator_vasp_id.clone(),
            originator_wallet_id,
            beneficiary_vasp_id,
            beneficiary_wallet_id,
            crypto_type,
            amount,
        })
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Parses a strictly positive, finite decimal amount.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let amount: f64 = raw.trim().parse().ok()?;
    (amount.is_finite() && amount > 0.0).then_some(amount)
}

/// Validates drafts and forwards accepted requests to a connection.
#[derive(Clone, Debug, Default)]
pub struct TransactionRequestDispatcher<N> {
    notifier: N,
}

impl<N: Notifier> TransactionRequestDispatcher<N> {
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Validates `draft` and sends it once over `originator`.
    ///
    /// A failing precondition alerts the user and nothing is sent. A valid
    /// request is handed to the sink exactly once; the returned
    /// [`SendOutcome`] says whether the sink accepted it, not whether it was
    /// delivered.
    pub fn dispatch<S>(
        &self,
        draft: &TransferDraft,
        originator: &S,
    ) -> Result<(TransactionRequest, SendOutcome), ValidationError>
    where
        S: TransactionSink + ?Sized,
    {
        let request = match draft.validate() {
            Ok(request) => request,
            Err(err) => {
                self.notifier.alert(&err.to_string());
                return Err(err);
            }
        };

        let outcome = originator.send_transaction_request(request.clone());
        info!(
            event = "transaction_request_dispatched",
            originator_vasp_id = %request.originator_vasp_id,
            beneficiary_vasp_id = %request.beneficiary_vasp_id,
            crypto_type = %request.crypto_type,
            amount = request.amount,
            outcome = ?outcome
        );
        Ok((request, outcome))
    }
}
