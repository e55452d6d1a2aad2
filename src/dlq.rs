use tracing::warn;

use crate::domain::{DeadLetterQueue, Error};

/// Logs rejected commands; the run carries on.
#[derive(Default, Debug)]
pub struct LogDLQ {}

impl DeadLetterQueue for LogDLQ {
    fn report(&self, error: &Error) {
        let transient = matches!(error, Error::Ledger(e) if e.is_transient());
        warn!(%error, transient, "command dead-lettered");
    }
}
