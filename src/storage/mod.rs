pub mod audit;
pub mod db;
pub mod profiles;
pub mod requests;
pub mod settings;

pub use db::{create_pool, get_connection, DbConnection, DbPool};
pub use requests::{DepositRequest, DepositStatus};
