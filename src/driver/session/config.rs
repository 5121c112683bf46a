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

use std::sync::Arc;
use std::time::Duration;

use super::bookmarks::{BookmarkManager, Bookmarks};
use crate::driver::config::auth::AuthToken;
use crate::driver::config::ConfigureFetchSizeError;

/// Configuration for a [`Session`](crate::session::Session).
///
/// See [`Driver::session()`](crate::driver::Driver::session).
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub(crate) database: Option<Arc<String>>,
    pub(crate) bookmarks: Option<Arc<Bookmarks>>,
    pub(crate) bookmark_manager: Option<Arc<dyn BookmarkManager>>,
    pub(crate) impersonated_user: Option<Arc<String>>,
    pub(crate) fetch_size: Option<i64>,
    pub(crate) auth: Option<Arc<AuthToken>>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the database to run queries against.
    ///
    /// Always specify the database when you can; this saves round trips for
    /// resolving the default database and lets the routing layer cache more
    /// efficiently.
    pub fn with_database(mut self, database: Arc<String>) -> Self {
        self.database = Some(database);
        self
    }

    /// Use the server-side configured default database.
    ///
    /// This is the *default*.
    pub fn with_default_database(mut self) -> Self {
        self.database = None;
        self
    }

    /// Initial bookmarks establishing the causal chain this session
    /// continues.
    pub fn with_bookmarks(mut self, bookmarks: Arc<Bookmarks>) -> Self {
        self.bookmarks = Some(bookmarks);
        self
    }

    pub fn without_bookmarks(mut self) -> Self {
        self.bookmarks = None;
        self
    }

    /// Let a [`BookmarkManager`] chain this session's work together with all
    /// other work sharing the same manager.
    pub fn with_bookmark_manager(mut self, manager: Arc<dyn BookmarkManager>) -> Self {
        self.bookmark_manager = Some(manager);
        self
    }

    pub fn without_bookmark_manager(mut self) -> Self {
        self.bookmark_manager = None;
        self
    }

    /// Run all work of this session impersonating the given user.
    pub fn with_impersonated_user(mut self, user: Arc<String>) -> Self {
        self.impersonated_user = Some(user);
        self
    }

    pub fn without_impersonated_user(mut self) -> Self {
        self.impersonated_user = None;
        self
    }

    /// How many records to request from the server at once when streaming
    /// results.
    ///
    /// Fails with [`ConfigureFetchSizeError`] unless the value is positive;
    /// see [`SessionConfig::with_fetch_all()`] for requesting complete
    /// streams at once.
    pub fn with_fetch_size(mut self, fetch_size: i64) -> Result<Self, ConfigureFetchSizeError<Self>> {
        if fetch_size > 0 {
            self.fetch_size = Some(fetch_size);
            Ok(self)
        } else {
            Err(ConfigureFetchSizeError { builder: self })
        }
    }

    /// Request complete result streams in a single batch.
    pub fn with_fetch_all(mut self) -> Self {
        self.fetch_size = Some(crate::driver::record_stream::FETCH_ALL);
        self
    }

    /// Fall back to the driver's fetch size. This is the *default*.
    pub fn with_default_fetch_size(mut self) -> Self {
        self.fetch_size = None;
        self
    }

    /// Authenticate this session with the given token instead of the
    /// driver-wide one.
    pub fn with_session_auth(mut self, auth: Arc<AuthToken>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn without_session_auth(mut self) -> Self {
        self.auth = None;
        self
    }
}

impl AsRef<SessionConfig> for SessionConfig {
    #[inline]
    fn as_ref(&self) -> &SessionConfig {
        self
    }
}

/// Internal session configuration enriched with driver-level settings.
#[derive(Debug)]
pub(crate) struct InternalSessionConfig {
    pub(crate) config: SessionConfig,
    pub(crate) idle_time_before_connection_test: Option<Duration>,
    pub(crate) eager_begin: bool,
}
