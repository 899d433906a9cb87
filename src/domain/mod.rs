pub mod invoice;
pub mod ledger;
pub mod lock;
pub mod ports;
pub mod status;
