mod manager;

pub use manager::{AccountManager, AccountStatus};
