//! # pgx-session
//!
//! Session and session-factory contracts consumed by the pgx connection pool.
//!
//! A [`Session`] is one stateful channel to the database server. It runs one
//! command at a time and is never shared between two holders. A
//! [`SessionFactory`] turns [`ConnectionParameters`] into a fresh session or a
//! classified [`ConnectError`].
//!
//! The wire protocol itself lives behind these traits; this crate only fixes
//! the shape of the boundary.
//!
//! ## Typed scalars
//!
//! Single-value queries come back as an untyped [`Value`]. The [`FromValue`]
//! trait decodes them into a concrete Rust type, failing with a
//! [`DecodeError`] instead of converting implicitly:
//!
//! ```rust,ignore
//! use pgx_session::Session;
//!
//! let counter: i32 = session.scalar("select counter from t").await?;
//! let maybe_name: Option<String> = session.scalar("select name from t").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod from_value;
pub mod params;
pub mod session;
pub mod value;

pub use error::{ConnectError, DecodeError, Result, SessionError};
pub use from_value::FromValue;
pub use params::ConnectionParameters;
pub use session::{ExecuteResult, Session, SessionFactory};
pub use value::Value;
