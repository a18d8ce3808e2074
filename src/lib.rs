//! # sqlgate
//!
//! An async multi-backend SQL gateway: named connections, a serial worker
//! per connection, and message-passing result delivery keyed by caller and
//! sequence number.
//!
//! Supported backends: PostgreSQL, MySQL, and SQLite through `sqlx`, and
//! SQL Server through `tiberius`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sqlgate::{params, CallerId, Registry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::new();
//!     let conn = registry.connect("sqlite::memory:", "main", None).await?;
//!
//!     let caller = CallerId::new(1);
//!     conn.query(caller, "CREATE TABLE users(name TEXT, age INT)", params![])
//!         .await;
//!     conn.query(caller, "INSERT INTO users VALUES (?, ?)", params!["ana", 34])
//!         .await;
//!
//!     let result = conn.query(caller, "SELECT name, age FROM users", params![]).await;
//!     for row in result.rows().ok_or("query failed")? {
//!         println!("{} is {}", row.get("name").unwrap(), row.get("age").unwrap());
//!     }
//!
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```

mod backend;
mod dispatch;

pub mod correlator;
pub mod error;
pub mod registry;
pub mod transaction;
pub mod value;

pub use correlator::CallerId;
pub use error::{ConnectError, DbError, ErrorKind, NotFoundError};
pub use registry::{Connection, Registry};
pub use transaction::TransactionSpec;
pub use value::{ResultSet, Row, Value};
