pub mod calendar;
pub mod compactor;
pub mod config;
pub mod error;
pub mod http;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reservation;
pub mod session;
pub mod slots;
pub mod wal;
