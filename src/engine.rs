use std::collections::HashMap;

use crate::domain::{
    AccountId, Command, Error, FundRequestId, LedgerStore,
    traits::{CommandStream, DeadLetterQueue, OutputRepository},
};
use crate::ledger::Ledger;

use futures::StreamExt;
use tracing::debug;

/// Drives a stream of gateway commands through the ledger, one operation per
/// command. Failures go to the dead-letter queue and processing continues.
#[derive(Debug)]
pub struct Engine<I, S, O, D>
where
    I: CommandStream,
    S: LedgerStore,
    O: OutputRepository,
    D: DeadLetterQueue,
{
    ingestion: I,
    ledger: Ledger<S>,
    output_repository: O,
    dlq: D,
    labels: HashMap<String, FundRequestId>,
}

impl<I, S, O, D> Engine<I, S, O, D>
where
    I: CommandStream,
    S: LedgerStore,
    O: OutputRepository,
    D: DeadLetterQueue,
{
    pub fn new(ingestion: I, ledger: Ledger<S>, output_repository: O, dlq: D) -> Self {
        Self {
            ingestion,
            ledger,
            output_repository,
            dlq,
            labels: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub async fn process(&mut self) -> Result<(), Error> {
        let mut res = self.ingestion.stream();

        while let Some(cmd) = res.next().await {
            match cmd {
                Ok(cmd) => {
                    debug!(%cmd, "applying command");
                    if let Err(e) = self.apply_command(cmd).await {
                        self.dlq.report(&e);
                    }
                }
                Err(e) => self.dlq.report(&e),
            }
        }

        Ok(())
    }

    async fn apply_command(&mut self, cmd: Command) -> Result<(), Error> {
        match cmd {
            Command::Open { email } => {
                self.ledger.open_account(&email).await?;
            }
            Command::AddFunds {
                email,
                amount,
                description,
            } => {
                let id = self.resolve(&email).await?;
                self.ledger.add_funds(id, amount, &description).await?;
            }
            Command::Withdraw {
                email,
                amount,
                description,
            } => {
                let id = self.resolve(&email).await?;
                self.ledger.withdraw(id, amount, &description).await?;
            }
            Command::Transfer {
                email,
                recipient,
                amount,
                description,
            } => {
                let id = self.resolve(&email).await?;
                self.ledger
                    .transfer(id, recipient.as_str(), amount, &description)
                    .await?;
            }
            Command::RequestFunds {
                email,
                label,
                amount,
                reason,
            } => {
                if self.labels.contains_key(&label) {
                    return Err(Error::Engine(format!("Request label {} already used", label)));
                }
                let id = self.resolve(&email).await?;
                let request = self.ledger.request_funds(id, amount, &reason).await?;
                self.labels.insert(label, request.id);
            }
            Command::Approve { label } => {
                let id = self.request_id(&label)?;
                self.ledger.approve_fund_request(id).await?;
            }
            Command::Reject { label, reason } => {
                let id = self.request_id(&label)?;
                self.ledger.reject_fund_request(id, &reason).await?;
            }
        }
        Ok(())
    }

    /// Stands in for the gateway's authentication step: email to account id.
    async fn resolve(&self, email: &str) -> Result<AccountId, Error> {
        Ok(self.ledger.find_account_by_email(email).await?.id)
    }

    fn request_id(&self, label: &str) -> Result<FundRequestId, Error> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::Engine(format!("Unknown request label {}", label)))
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        for account in self.ledger.list_accounts().await? {
            self.output_repository.record_balance(&account);
        }
        self.output_repository.flush()
    }
}
