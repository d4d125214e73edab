// Entry point for the ledger operator CLI
use clap::Parser;
use farmgate_ledger::cli::LegacyStatusArg;
use farmgate_ledger::{
    BlockTransaction, Command, Config, Ledger, LegacyStatus, Opt, TransactionRequest,
};
use log::{error, LevelFilter};
use std::process;

fn main() {
    // Info level by default, RUST_LOG still overrides it
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

// Flags win over the environment, which wins over the config file
fn load_config(opt: &Opt) -> Result<Config, Box<dyn std::error::Error>> {
    Ok(Config::resolve(
        opt.config.as_deref(),
        opt.data_dir.clone(),
        opt.difficulty,
    )?)
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&opt)?;
    let mut ledger = Ledger::open(config)?;

    match opt.command {
        Command::Record {
            buyer_id,
            seller_id,
            product_id,
            amount,
            buyer_name,
            product_name,
            mine,
        } => {
            let mut request = TransactionRequest::new(&buyer_id, &seller_id, &product_id, amount);
            request.buyer_name = buyer_name;
            request.product_name = product_name;

            let receipt = ledger.record(&request)?;
            println!("Recorded {} ({})", receipt.transaction_id, receipt.status);

            // The pool only lives as long as this process, so mining here is
            // the only way a CLI-recorded transaction gets into a block
            if mine {
                let outcome = ledger.mine_pending(None)?;
                println!("Mined block {}: {}", outcome.block.get_index(), outcome.block.get_hash());
            }
        }
        Command::Mine { miner } => {
            let outcome = ledger.mine_pending(miner.as_deref())?;
            println!(
                "Mined block {}: {}",
                outcome.block.get_index(),
                outcome.block.get_hash()
            );
            println!("Confirmed {} transactions", outcome.confirmed.len());
            for divergence in &outcome.divergences {
                println!("- {divergence}");
            }
        }
        Command::Validate => match ledger.verify() {
            Ok(()) => println!("Chain is valid ({} blocks)", ledger.chain().len()),
            Err(e) => {
                println!("Chain is invalid: {e}");
                return Err(e.into());
            }
        },
        Command::Printchain => {
            for block in ledger.chain().blocks() {
                println!("Block index: {}", block.get_index());
                println!("Pre block hash: {}", block.get_previous_hash());
                println!("Cur block hash: {}", block.get_hash());
                println!("Cur block Timestamp: {}", block.get_timestamp());
                println!("Nonce: {}", block.get_nonce());

                for entry in block.get_transactions() {
                    match entry {
                        BlockTransaction::Transfer(tx) => println!(
                            "- Transaction {}: {} -> {} product {} amount {}",
                            tx.get_id(),
                            tx.get_seller_id(),
                            tx.get_buyer_id(),
                            tx.get_product_id(),
                            tx.get_amount()
                        ),
                        BlockTransaction::Reward(reward) => println!(
                            "- Reward {} to {}",
                            reward.get_amount(),
                            reward.get_recipient()
                        ),
                    }
                }
                println!()
            }
        }
        Command::CreateContract {
            buyer_id,
            seller_id,
            product_id,
            price,
            terms,
        } => {
            let contract_id =
                ledger.create_contract(&buyer_id, &seller_id, &product_id, price, &terms)?;
            println!("Created contract {contract_id}");
        }
        Command::ExecuteContract { contract_id } => {
            let outcome = ledger.execute_contract(&contract_id)?;
            println!(
                "Executed contract {}, queued transaction {}",
                outcome.contract.get_contract_id(),
                outcome.transaction_id
            );
            if !outcome.reconciled.is_empty() {
                println!("Approved {} earlier legacy rows", outcome.reconciled.len());
            }
            for divergence in &outcome.divergences {
                println!("- {divergence}");
            }
            // The settling transaction would be lost with the pool otherwise
            let block = ledger.mine_pending(None)?.block;
            println!("Mined block {}: {}", block.get_index(), block.get_hash());
        }
        Command::Approve { transaction_id } => {
            let row = ledger.approve(&transaction_id)?;
            println!("Approved: {row}");
        }
        Command::History { user } => {
            for record in ledger.transaction_history(user.as_deref())? {
                let tx = record.get_transaction();
                println!(
                    "{} {} buyer={} seller={} product={} amount={} status={}",
                    tx.get_timestamp(),
                    tx.get_id(),
                    tx.get_buyer_id(),
                    tx.get_seller_id(),
                    tx.get_product_id(),
                    tx.get_amount(),
                    record.get_status()
                );
            }
        }
        Command::Contracts { user } => {
            for contract in ledger.contract_history(user.as_deref())? {
                println!(
                    "{} buyer={} seller={} product={} price={} status={}",
                    contract.get_contract_id(),
                    contract.get_buyer_id(),
                    contract.get_seller_id(),
                    contract.get_product_id(),
                    contract.get_price(),
                    contract.get_status()
                );
            }
        }
        Command::Report => {
            println!("{}", ledger.report()?);
        }
        Command::Reconcile => {
            let summary = ledger.reconcile_all()?;
            println!(
                "Approved {}, recreated {}, failed {}",
                summary.approved.len(),
                summary.recreated.len(),
                summary.failed.len()
            );
            for (transaction_id, reason) in &summary.failed {
                println!("- {transaction_id}: {reason}");
            }
        }
        Command::Divergences => {
            let divergent = ledger.divergences()?;
            if divergent.is_empty() {
                println!("Legacy table is in step with the chain");
            }
            for transaction_id in divergent {
                println!("{transaction_id}");
            }
        }
        Command::Legacy { status } => {
            let wanted = status.map(|s| match s {
                LegacyStatusArg::Pending => LegacyStatus::Pending,
                LegacyStatusArg::Approved => LegacyStatus::Approved,
            });
            for row in ledger.legacy_rows()? {
                if wanted.map_or(true, |w| row.get_status() == w) {
                    println!("{row}");
                }
            }
        }
    }

    ledger.flush()?;
    Ok(())
}
