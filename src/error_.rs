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

use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::io;
use std::sync::Arc;

use log::info;
use thiserror::Error;

use crate::driver::io::bolt::BoltMeta;
use crate::value::ValueReceive;

// imports for docs
#[allow(unused)]
use crate::address_::resolution::AddressResolver;
#[allow(unused)]
use crate::driver::session::bookmarks::BookmarkManager;
#[allow(unused)]
use crate::driver::DriverConfig;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors that can occur while using the driver.
///
/// **Important Notes on Usage:**
///  * Error messages are *not* considered part of the driver's API.
///    They may change at any time and don't follow semantic versioning.
///  * The only string in errors that can be somewhat reliably used is
///    [`ServerError::code()`], which is received from the server as-is.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Used when experiencing a connectivity error: not able to connect,
    /// a broken socket, not able to fetch routing information.
    #[error("connection failed: {message} (during commit: {during_commit}){}",
            source.as_ref().map(|err| format!(" caused by: {err}")).unwrap_or_default())]
    #[non_exhaustive]
    Disconnect {
        message: String,
        // Kept behind an Arc so the stored fatal error of a broken connection
        // can be replayed to every queued and future response observer.
        source: Option<Arc<io::Error>>,
        /// `true` when the connection was lost while the driver cannot be
        /// sure whether the ongoing transaction has been committed or not.
        /// Business logic has to decide whether such work may be retried.
        during_commit: bool,
    },

    /// Used when the driver encounters an error caused by user input.
    /// For example:
    ///  * an unparsable connection URI,
    ///  * using a feature that is not supported over the negotiated protocol
    ///    version,
    ///  * a too large collection (max. [`i64::MAX`] elements),
    ///  * TLS or socket configuration that the OS rejects,
    ///  * an address resolver returning no addresses.
    #[error("invalid configuration: {message}")]
    #[non_exhaustive]
    InvalidConfig { message: String },

    /// Used when the server returns an error.
    #[error("{error}")]
    #[non_exhaustive]
    ServerError { error: ServerError },

    /// Used when connection acquisition timed out
    /// ([`DriverConfig::with_connection_acquisition_timeout()`]).
    #[error("{message}")]
    #[non_exhaustive]
    Timeout { message: String },

    /// Used when a user-provided callback failed.
    ///
    /// See [`UserCallbackError`] for more information.
    #[error("{error}")]
    #[non_exhaustive]
    UserCallback { error: UserCallbackError },

    /// An unexpected message or message content was received from the server.
    /// If you encounter this error, there is either a bug in the driver or in
    /// the server.
    #[error(
        "the driver encountered a protocol violation, \
        this is likely a bug in the driver or the server: {message}"
    )]
    #[non_exhaustive]
    ProtocolError { message: String },
}

impl DriverError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DriverError::ServerError { error } => error.is_retryable(),
            DriverError::Disconnect { during_commit, .. } => !during_commit,
            _ => false,
        }
    }

    pub(crate) fn wrap_read<T>(res: io::Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(Self::read_err(err)),
        }
    }

    pub(crate) fn read_err(err: io::Error) -> Self {
        info!("read error: {}", err);
        Self::Disconnect {
            message: String::from("failed to read"),
            source: Some(Arc::new(err)),
            during_commit: false,
        }
    }

    pub(crate) fn wrap_write<T>(res: io::Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(Self::write_err(err)),
        }
    }

    pub(crate) fn write_err(err: io::Error) -> DriverError {
        info!("write error: {}", err);
        Self::Disconnect {
            message: String::from("failed to write"),
            source: Some(Arc::new(err)),
            during_commit: false,
        }
    }

    pub(crate) fn connect_err(err: io::Error) -> DriverError {
        Self::Disconnect {
            message: String::from("failed to open connection"),
            source: Some(Arc::new(err)),
            during_commit: false,
        }
    }

    pub(crate) fn wrap_connect<T>(res: io::Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(Self::connect_err(err)),
        }
    }

    pub(crate) fn disconnect<S: Into<String>>(message: S) -> Self {
        Self::Disconnect {
            message: message.into(),
            source: None,
            during_commit: false,
        }
    }

    pub(crate) fn protocol_error<S: Into<String>>(message: S) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub(crate) fn failed_commit(mut self) -> Self {
        if let Self::Disconnect { during_commit, .. } = &mut self {
            *during_commit = true;
        }
        self
    }

    pub(crate) fn wrap_commit<T>(res: Result<T>) -> Result<T> {
        match res {
            Ok(t) => Ok(t),
            Err(err) => Err(err.failed_commit()),
        }
    }

    pub(crate) fn connection_acquisition_timeout<S: AsRef<str>>(during: S) -> Self {
        Self::Timeout {
            message: format!("connection acquisition timed out while {}", during.as_ref()),
        }
    }

    /// Duplicate an error a connection has stored as its fatal failure so that
    /// it can be handed to each of the connection's pending observers.
    /// Only variants a connection ever stores are reproduced faithfully.
    pub(crate) fn replay(&self) -> Self {
        match self {
            DriverError::Disconnect {
                message,
                source,
                during_commit,
            } => DriverError::Disconnect {
                message: message.clone(),
                source: source.as_ref().map(Arc::clone),
                during_commit: *during_commit,
            },
            DriverError::ProtocolError { message } => DriverError::ProtocolError {
                message: message.clone(),
            },
            DriverError::ServerError { error } => DriverError::ServerError {
                error: error.clone(),
            },
            err => DriverError::disconnect(format!("connection closed because: {err}")),
        }
    }

    pub(crate) fn fatal_during_discovery(&self) -> bool {
        match self {
            DriverError::ServerError { error } => error.fatal_during_discovery(),
            DriverError::InvalidConfig { .. } => true,
            DriverError::UserCallback { .. } => true,
            _ => false,
        }
    }
}

/// An error reported by the server, carrying a stable string error code.
///
/// Callers are expected to branch on [`ServerError::code()`], never on the
/// message text.
#[derive(Debug, Clone)]
pub struct ServerError {
    pub code: String,
    pub message: String,
    retryable_overwrite: bool,
}

impl ServerError {
    pub fn new(code: String, message: String) -> Self {
        let code = match code.as_str() {
            // In server version 5.0, these errors have been re-classified as
            // client errors. For backwards compatibility with 4.4 and earlier,
            // they are re-mapped in the driver, too.
            "Neo.TransientError.Transaction.Terminated" => {
                String::from("Neo.ClientError.Transaction.Terminated")
            }
            "Neo.TransientError.Transaction.LockClientStopped" => {
                String::from("Neo.ClientError.Transaction.LockClientStopped")
            }
            _ => code,
        };
        Self {
            code,
            message,
            retryable_overwrite: false,
        }
    }

    pub(crate) fn from_meta(mut meta: BoltMeta) -> Self {
        let code = match meta.remove("code") {
            Some(ValueReceive::String(code)) => code,
            _ => "Neo.DatabaseError.General.UnknownError".into(),
        };
        let message = match meta.remove("message") {
            Some(ValueReceive::String(message)) => message,
            _ => "An unknown error occurred.".into(),
        };
        Self::new(code, message)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("")
    }

    pub fn category(&self) -> &str {
        self.code.split('.').nth(2).unwrap_or("")
    }

    pub fn title(&self) -> &str {
        self.code.split('.').nth(3).unwrap_or("")
    }

    /// The explicit classification table deciding which server errors managed
    /// transaction functions retry:
    ///  * every code with the `TransientError` classification
    ///    (e.g., deadlocks, leader switches),
    ///  * `Neo.ClientError.Security.AuthorizationExpired`,
    ///  * `Neo.ClientError.Cluster.NotALeader`,
    ///  * `Neo.ClientError.General.ForbiddenOnReadOnlyDatabase`.
    pub(crate) fn is_retryable(&self) -> bool {
        self.retryable_overwrite
            || match self.code() {
                "Neo.ClientError.Security.AuthorizationExpired"
                | "Neo.ClientError.Cluster.NotALeader"
                | "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase" => true,
                _ => self.classification() == "TransientError",
            }
    }

    /// Codes that signal a configuration problem while fetching routing
    /// information. These must fail discovery immediately instead of moving on
    /// to the next router. Notably, a missing routing procedure means the
    /// target is no cluster member at all.
    pub(crate) fn fatal_during_discovery(&self) -> bool {
        match self.code() {
            "Neo.ClientError.Procedure.ProcedureNotFound"
            | "Neo.ClientError.Database.DatabaseNotFound"
            | "Neo.ClientError.Transaction.InvalidBookmark"
            | "Neo.ClientError.Transaction.InvalidBookmarkMixture"
            | "Neo.ClientError.Statement.TypeError"
            | "Neo.ClientError.Statement.ArgumentError"
            | "Neo.ClientError.Request.Invalid" => true,
            code => {
                code.starts_with("Neo.ClientError.Security.")
                    && code != "Neo.ClientError.Security.AuthorizationExpired"
            }
        }
    }

    /// The server has stopped serving the database entirely; remove it from
    /// the routing table regardless of role.
    pub(crate) fn deactivates_server(&self) -> bool {
        self.code.as_str() == "Neo.TransientError.General.DatabaseUnavailable"
    }

    /// The server lost its writer role (e.g., after a leader switch); remove it
    /// from the writers list only.
    pub(crate) fn invalidates_writer(&self) -> bool {
        matches!(
            self.code(),
            "Neo.ClientError.Cluster.NotALeader"
                | "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase"
        )
    }

    pub(crate) fn clone_with_reason(&self, reason: &str) -> Self {
        Self {
            code: self.code.clone(),
            message: format!("{}: {}", reason, self.message),
            retryable_overwrite: self.retryable_overwrite,
        }
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UserCallbackError {
    /// The configured [`AddressResolver`] ([`DriverConfig::with_resolver()`])
    /// returned an error.
    #[error("resolver callback failed: {0}")]
    Resolver(BoxError),
    /// The configured [`BookmarkManager`]'s
    /// [`get_bookmarks()`](BookmarkManager::get_bookmarks) returned an error.
    /// In this case, the transaction will not have taken place.
    #[error("BookmarkManager get_bookmarks failed: {0}")]
    BookmarkManagerGet(BoxError),
    /// The configured [`BookmarkManager`]'s
    /// [`update_bookmarks()`](BookmarkManager::update_bookmarks) returned an
    /// error.
    /// In this case, the transaction will have taken place already.
    #[error("BookmarkManager update_bookmarks failed: {0}")]
    BookmarkManagerUpdate(BoxError),
}

impl UserCallbackError {
    pub fn user_error(&self) -> &dyn StdError {
        match self {
            UserCallbackError::Resolver(err)
            | UserCallbackError::BookmarkManagerGet(err)
            | UserCallbackError::BookmarkManagerUpdate(err) => err.as_ref(),
        }
    }

    pub fn into_user_error(self) -> BoxError {
        match self {
            UserCallbackError::Resolver(err)
            | UserCallbackError::BookmarkManagerGet(err)
            | UserCallbackError::BookmarkManagerUpdate(err) => err,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        DriverError::ServerError { error: err }
    }
}
