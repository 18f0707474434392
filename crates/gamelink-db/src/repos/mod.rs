//! Repository implementations of the engine's storage traits

mod commission;
mod order;
mod ranking;

pub use commission::PgCommissionStore;
pub use order::PgOrderLookup;
pub use ranking::RankingConfigRepo;
