/// `MySQL` driver binding using `SQLx`
pub mod mysql;

pub use mysql::{MySqlSqlxDriver, SqlxDatabaseError};
