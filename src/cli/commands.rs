use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

/// Legacy row status filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LegacyStatusArg {
    Pending,
    Approved,
}

impl FromStr for LegacyStatusArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(LegacyStatusArg::Pending),
            "approved" => Ok(LegacyStatusArg::Approved),
            _ => Err(format!(
                "Invalid status: {s}. Valid options: pending, approved"
            )),
        }
    }
}

impl std::fmt::Display for LegacyStatusArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegacyStatusArg::Pending => write!(f, "pending"),
            LegacyStatusArg::Approved => write!(f, "approved"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "farmgate-ledger")]
pub struct Opt {
    #[arg(long = "config", global = true, help = "TOML configuration file")]
    pub config: Option<PathBuf>,
    #[arg(long = "data-dir", global = true, help = "Directory holding the ledger tables")]
    pub data_dir: Option<PathBuf>,
    #[arg(
        long = "difficulty",
        global = true,
        help = "Leading zero hex characters required in block hashes"
    )]
    pub difficulty: Option<usize>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "record", about = "Record a purchase as a pending transaction")]
    Record {
        #[arg(help = "Buyer id")]
        buyer_id: String,
        #[arg(help = "Seller id")]
        seller_id: String,
        #[arg(help = "Product id")]
        product_id: String,
        #[arg(help = "Amount paid")]
        amount: f64,
        #[arg(long = "buyer-name", help = "Buyer name for the legacy table")]
        buyer_name: Option<String>,
        #[arg(long = "product-name", help = "Product name for the legacy table")]
        product_name: Option<String>,
        #[arg(long = "mine", help = "Mine a block right after recording")]
        mine: bool,
    },
    #[command(name = "mine", about = "Mine pending transactions into a new block")]
    Mine {
        #[arg(long = "miner", help = "Identity credited with the block reward")]
        miner: Option<String>,
    },
    #[command(name = "validate", about = "Verify hashes and links of the whole chain")]
    Validate,
    #[command(name = "printchain", about = "Print all blocks in the chain")]
    Printchain,
    #[command(name = "create-contract", about = "Create a smart contract")]
    CreateContract {
        #[arg(help = "Buyer id")]
        buyer_id: String,
        #[arg(help = "Seller id")]
        seller_id: String,
        #[arg(help = "Product id")]
        product_id: String,
        #[arg(help = "Agreed price")]
        price: f64,
        #[arg(long = "terms", default_value = "", help = "Free-form contract terms")]
        terms: String,
    },
    #[command(name = "execute-contract", about = "Execute a created contract")]
    ExecuteContract {
        #[arg(help = "Contract id")]
        contract_id: String,
    },
    #[command(name = "approve", about = "Approve the legacy row of a confirmed transaction")]
    Approve {
        #[arg(help = "Transaction id")]
        transaction_id: String,
    },
    #[command(name = "history", about = "List recorded transactions")]
    History {
        #[arg(long = "user", help = "Only transactions where USER is buyer or seller")]
        user: Option<String>,
    },
    #[command(name = "contracts", about = "List smart contracts")]
    Contracts {
        #[arg(long = "user", help = "Only contracts where USER is buyer or seller")]
        user: Option<String>,
    },
    #[command(name = "report", about = "Show ledger activity report")]
    Report,
    #[command(name = "reconcile", about = "Repair legacy rows diverging from the chain")]
    Reconcile,
    #[command(
        name = "divergences",
        about = "List confirmed transactions whose legacy row is not approved"
    )]
    Divergences,
    #[command(name = "legacy", about = "Print the legacy transaction table")]
    Legacy {
        #[arg(long = "status", help = "Row status (pending, approved)")]
        status: Option<LegacyStatusArg>,
    },
}
