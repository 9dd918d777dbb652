pub mod agent;
pub mod competition;
pub mod decision;
pub mod market;
pub mod position;
pub mod state;
pub mod trade;

pub use agent::*;
pub use competition::*;
pub use decision::*;
pub use market::*;
pub use position::*;
pub use state::*;
pub use trade::*;
