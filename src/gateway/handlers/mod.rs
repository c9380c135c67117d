//! HTTP handlers, one module per resource

pub mod account;
pub mod health;
pub mod saga;
pub mod transaction;
pub mod transfer;

pub use account::{create_account, get_account};
pub use health::health_check;
pub use saga::create_saga;
pub use transaction::{create_transaction, get_transaction, list_transactions};
pub use transfer::create_transfer;
