use std::io::Write;

use crate::domain::{Account, Error, OutputRepository};

/// Writes `account,balance` rows as CSV, sorted by account email.
#[derive(Debug)]
pub struct CsvBalanceReport<W: Write> {
    rows: Vec<(String, String)>,
    writer: W,
}

impl CsvBalanceReport<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> CsvBalanceReport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            rows: Vec::new(),
            writer,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputRepository for CsvBalanceReport<W> {
    fn record_balance(&mut self, account: &Account) {
        self.rows
            .push((account.email.clone(), account.balance.to_string()));
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.rows.sort();

        let mut wtr = csv::Writer::from_writer(&mut self.writer);
        wtr.write_record(["account", "balance"])
            .map_err(|e| Error::Engine(format!("report write failed: {}", e)))?;
        for (email, balance) in self.rows.drain(..) {
            wtr.write_record([email.as_str(), balance.as_str()])
                .map_err(|e| Error::Engine(format!("report write failed: {}", e)))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Money;

    #[test]
    fn writes_sorted_rows_with_header() {
        let mut report = CsvBalanceReport::new(Vec::new());
        let mut b = Account::new("b@x.io");
        b.balance = Money::from_minor(4_000);
        report.record_balance(&b);
        report.record_balance(&Account::new("a@x.io"));
        report.flush().unwrap();

        let out = String::from_utf8(report.into_inner()).unwrap();
        assert_eq!(out, "account,balance\na@x.io,0.00\nb@x.io,40.00\n");
    }
}
