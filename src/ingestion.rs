use std::io::Read;
use std::pin::Pin;

use futures::stream::{self, Stream};
use serde::Deserialize;

use crate::domain::traits::CommandStream;
use crate::domain::{Command, Error, Money};

pub struct CsvReader<R: Read> {
    reader: Option<csv::Reader<R>>,
}

impl<R: Read> CsvReader<R> {
    pub fn new(reader: R) -> Result<Self, Error> {
        let rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        Ok(Self { reader: Some(rdr) })
    }
}

/// Internal shape used only for CSV deserialization.
#[derive(Debug, Deserialize)]
struct CsvRow {
    command: String,
    account: Option<String>,
    target: Option<String>,
    amount: Option<Money>,
    note: Option<String>,
}

fn required(field: Option<String>, name: &str, command: &str) -> Result<String, Error> {
    field
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Ingestion(format!("{} requires a {}", command, name)))
}

impl TryFrom<CsvRow> for Command {
    type Error = Error;

    fn try_from(row: CsvRow) -> Result<Self, Self::Error> {
        let command = row.command.trim().to_ascii_lowercase();
        let note = row.note.unwrap_or_default();

        // Amount sign is not checked here; the ledger owns that rule.
        let amount = |name: &str| {
            row.amount
                .ok_or_else(|| Error::Ingestion(format!("{} requires an amount", name)))
        };

        let cmd = match command.as_str() {
            "open" => Command::Open {
                email: required(row.account, "account", &command)?,
            },
            "add_funds" => Command::AddFunds {
                amount: amount(&command)?,
                email: required(row.account, "account", &command)?,
                description: note,
            },
            "withdraw" => Command::Withdraw {
                amount: amount(&command)?,
                email: required(row.account, "account", &command)?,
                description: note,
            },
            "transfer" => Command::Transfer {
                amount: amount(&command)?,
                email: required(row.account, "account", &command)?,
                recipient: required(row.target, "target", &command)?,
                description: note,
            },
            "request" => Command::RequestFunds {
                amount: amount(&command)?,
                email: required(row.account, "account", &command)?,
                label: required(row.target, "target", &command)?,
                reason: note,
            },
            "approve" => Command::Approve {
                label: required(row.target, "target", &command)?,
            },
            "reject" => Command::Reject {
                label: required(row.target, "target", &command)?,
                reason: note,
            },
            other => {
                return Err(Error::Ingestion(format!("Invalid command: {}", other)));
            }
        };

        Ok(cmd)
    }
}

impl<R: Read + Send + 'static> CommandStream for CsvReader<R> {
    type CmdStream = Pin<Box<dyn Stream<Item = Result<Command, Error>> + Send>>;

    fn stream(&mut self) -> Self::CmdStream {
        // Take ownership of the reader so the iterator we build owns all data and is 'static.
        let reader = match self.reader.take() {
            Some(r) => r,
            None => {
                // Already consumed; return an empty stream.
                return Box::pin(stream::iter(Vec::<Result<Command, Error>>::new()));
            }
        };

        let iter = reader
            .into_deserialize::<CsvRow>()
            .map(|row_res| match row_res {
                Ok(row) => Command::try_from(row),
                Err(e) => Err(Error::Ingestion(format!(
                    "CSV deserialization error: {}",
                    e
                ))),
            });

        Box::pin(stream::iter(iter))
    }
}
