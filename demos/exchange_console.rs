use std::error::Error;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use vasp_console::directory::DirectoryClient;
use vasp_console::dispatch::LogNotifier;
use vasp_console::stream::client::StreamEndpoint;
use vasp_console::stream::session::{ExchangeSession, TransferForm};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let local = std::env::args().any(|arg| arg == "--local");
    let endpoint = StreamEndpoint::new().with_local_mode(local);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let vasps = DirectoryClient::new(endpoint.clone())?.list_vasps().await?;
        if vasps.len() < 2 {
            return Err("directory lists fewer than two institutions".into());
        }
        let originator_id = vasps[0].vasp_id.clone();
        let beneficiary_id = vasps[1].vasp_id.clone();
        let originator_wallet = vasps[0].user_wallets.first().map(|w| w.wallet_address.clone());
        let beneficiary_wallet = vasps[1].user_wallets.first().map(|w| w.wallet_address.clone());

        let mut session = ExchangeSession::new(endpoint, vasps, LogNotifier);
        println!("session_id={}", session.session_id());

        session.select_originator(&originator_id)?;
        session.select_beneficiary(&beneficiary_id)?;
        for slot in [session.originator(), session.beneficiary()].into_iter().flatten() {
            if !slot.connection().wait_until_connected().await {
                return Err(format!("{} did not connect", slot.details().display_name).into());
            }
        }

        let (request, outcome) = session.send_transfer(&TransferForm {
            originator_wallet_id: originator_wallet,
            beneficiary_wallet_id: beneficiary_wallet,
            crypto_type: Some("BTC".to_string()),
            amount: "0.5".to_string(),
        })?;
        println!(
            "transfer {} => {} amount={} {} outcome={outcome:?}",
            request.originator_wallet_id,
            request.beneficiary_wallet_id,
            request.amount,
            request.crypto_type
        );

        tokio::time::sleep(Duration::from_secs(10)).await;

        for slot in [session.originator(), session.beneficiary()].into_iter().flatten() {
            let presenter = slot.presenter();
            println!("== {} ({}) ==", slot.details().display_name, presenter.role());
            for line in presenter.log_lines() {
                println!("{} {}", line.color, line.text);
            }
            for row in presenter.ledger_rows() {
                println!(
                    "{} {} {} {}",
                    row.timestamp, row.transaction_id, row.direction, row.details
                );
            }
        }

        Ok::<(), Box<dyn Error>>(())
    })
}
