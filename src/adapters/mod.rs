pub mod postgres;
pub mod quotes;

pub use postgres::PostgresLedger;
pub use quotes::HttpQuoteResolver;
