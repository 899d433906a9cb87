//! CSV batch input and ledger output.

pub mod ledger_writer;
pub mod operation_reader;
