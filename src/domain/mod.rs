pub mod ledger;
pub mod reading;

pub use ledger::*;
pub use reading::*;
