use crate::application::engine::InvoiceSummary;
use crate::domain::ledger::LedgerEntry;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct EntryRow<'a> {
    sequence: i64,
    transaction_id: &'a str,
    amount: i64,
    status: &'a str,
}

/// Writes ledger entries and invoice summaries as CSV with a header row.
pub struct LedgerWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> LedgerWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// `sequence,transaction_id,amount,status`
    pub fn write_entries(&mut self, entries: &[LedgerEntry]) -> Result<()> {
        if entries.is_empty() {
            self.writer
                .write_record(["sequence", "transaction_id", "amount", "status"])?;
        }
        for entry in entries {
            self.writer.serialize(EntryRow {
                sequence: entry.sequence,
                transaction_id: entry.transaction_id.as_str(),
                amount: entry.amount.value(),
                status: entry.status.as_str(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// `transaction_id,amount,status,captured,refunded`
    pub fn write_summaries(&mut self, summaries: &[InvoiceSummary]) -> Result<()> {
        if summaries.is_empty() {
            self.writer.write_record([
                "transaction_id",
                "amount",
                "status",
                "captured",
                "refunded",
            ])?;
        }
        for summary in summaries {
            self.writer.serialize(summary)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
