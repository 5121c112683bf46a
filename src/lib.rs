// Copyright the graphbolt authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![allow(clippy::option_map_unit_fn)]

//! # graphbolt
//!
//! A client driver for graph databases speaking the Bolt wire protocol
//! (Neo4j, Memgraph, and compatible servers).
//!
//! The driver manages a pool of physical connections, negotiates the protocol
//! version with each server, multiplexes request/response streams over those
//! connections, and exposes a session/transaction API on top.
//!
//! ## Compatibility
//! Bolt protocol versions 4.4 and 5.0 are supported.
//!
//! ## Basic Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use graphbolt::address::Address;
//! use graphbolt::driver::auth::AuthToken;
//! use graphbolt::driver::{ConnectionConfig, Driver, DriverConfig, RoutingControl};
//! use graphbolt::retry::ExponentialBackoff;
//! use graphbolt::{value_map, ValueReceive};
//!
//! let address = Address::from(("localhost", 7687));
//! let auth = AuthToken::new_basic_auth("user", "secret");
//! let driver = Driver::new(
//!     ConnectionConfig::new(address),
//!     DriverConfig::new().with_auth(Arc::new(auth)),
//! );
//!
//! let result = driver
//!     .execute_query("RETURN $x AS x")
//!     .with_parameters(value_map!({"x": 123}))
//!     .with_routing_control(RoutingControl::Read)
//!     .run_with_retry(ExponentialBackoff::default())
//!     .unwrap();
//! assert_eq!(
//!     result.into_scalar().unwrap(),
//!     ValueReceive::Integer(123)
//! );
//! ```
//!
//! ## Causal Consistency
//! After every successful write the server hands the client a bookmark, an
//! opaque token marking a point in the database's transaction history.
//! Passing bookmarks along with new work makes the server wait until the
//! bookmarked state is visible, which establishes a causal chain across
//! sessions.
//! Sessions chain their own transactions automatically; chains across sessions
//! are built by passing [`Bookmarks`] manually ([`Session::last_bookmarks()`])
//! or by sharing a [`BookmarkManager`].
//!
//! ## Logging
//! The driver logs through the [`log`] crate facade.
//! Log messages are meant for debugging the driver itself and are not part of
//! the API; anything user code needs to react to is reported via [`Result`]s.

mod address_;
pub mod driver;
mod error_;
mod macros;
mod sync;
mod time;
mod util;
pub mod value;

// imports for docs
#[allow(unused)]
use bookmarks::{BookmarkManager, Bookmarks};
#[allow(unused)]
use driver::Driver;
#[allow(unused)]
use session::Session;

pub use error_::{DriverError, Result};
pub use value::ValueReceive;
pub use value::ValueSend;

/// Address and address resolution.
pub mod address {
    pub use super::address_::resolution::*;
    pub use super::address_::*;
}
/// Bookmarks for [causal consistency](crate#causal-consistency).
pub mod bookmarks {
    pub use super::driver::session::bookmarks::*;
}
/// Error and result types.
pub mod error {
    pub use super::error_::{ServerError, UserCallbackError};
}
/// Retry policies.
pub mod retry {
    pub use super::driver::session::retry::*;
}
/// Session and session configuration.
pub mod session {
    pub use super::driver::session::*;
}
/// Query summary structs (metadata) received via
/// [`RecordStream::consume()`](driver::record_stream::RecordStream::consume).
pub mod summary {
    pub use super::driver::summary::*;
}
/// Transactions and associated types.
pub mod transaction {
    pub use super::driver::transaction::*;
}
