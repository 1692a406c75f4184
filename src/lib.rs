//! vertkit - an async Vertica client.
//!
//! ```no_run
//! # async fn run() -> vertkit::VerticaResult<()> {
//! let conn = vertkit::Connection::connect("vertica://dbadmin@localhost:5433/vmart").await?;
//! let rs = conn.query("SELECT 1 AS n").await?;
//! assert_eq!(rs.rows[0].get(0), Some(&b"1"[..]));
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod vertica;

pub use vertica::*;
