pub mod ledger;

pub use ledger::{AttendanceLedger, RecountStats};
