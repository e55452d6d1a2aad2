pub mod account;
pub mod command;
pub mod error;
pub mod fund_request;
pub mod id;
pub mod money;
pub mod traits;
pub mod transaction;

pub use account::{Account, Recipient};
pub use command::Command;
pub use error::{Entity, Error, LedgerError, StoreError};
pub use fund_request::{Decision, FundRequest, FundRequestStatus};
pub use id::{AccountId, FundRequestId, TransactionId};
pub use money::Money;
pub use traits::{AtomicUnit, CommandStream, DeadLetterQueue, LedgerStore, OutputRepository};
pub use transaction::{NewTransaction, Transaction, TransactionKind, TransactionStatus};
