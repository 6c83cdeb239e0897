//! Exchange access: the capability trait, the Bybit client and dry-run routing.

mod bybit_client;
mod dry_run;
mod exchange;
mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use bybit_client::BybitClient;
pub use dry_run::DryRunExchange;
pub use exchange::{Exchange, OrderStatus};
