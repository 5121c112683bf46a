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

use std::collections::HashMap;

use crate::value::ValueSend;

/// The credentials a connection authenticates with on HELLO.
///
/// The token is an opaque key-value map; which keys are required depends on
/// the chosen scheme and the server's configuration.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub(crate) data: HashMap<String, ValueSend>,
}

impl AuthToken {
    /// Create a token for the server's basic authentication scheme.
    pub fn new_basic_auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        let mut data = HashMap::with_capacity(3);
        data.insert("scheme".into(), "basic".into());
        data.insert("principal".into(), username.into().into());
        data.insert("credentials".into(), password.into().into());
        Self { data }
    }

    /// Like [`AuthToken::new_basic_auth`], but also specifying a realm.
    pub fn new_basic_auth_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        let mut token = Self::new_basic_auth(username, password);
        token.data.insert("realm".into(), realm.into().into());
        token
    }

    /// Create a token for the server's bearer authentication scheme
    /// (e.g., JWTs from an SSO provider).
    pub fn new_bearer_auth(base64_encoded_token: impl Into<String>) -> Self {
        let mut data = HashMap::with_capacity(2);
        data.insert("scheme".into(), "bearer".into());
        data.insert("credentials".into(), base64_encoded_token.into().into());
        Self { data }
    }

    /// Create a token for the server's kerberos authentication scheme.
    pub fn new_kerberos_auth(base64_encoded_ticket: impl Into<String>) -> Self {
        let mut data = HashMap::with_capacity(3);
        data.insert("scheme".into(), "kerberos".into());
        data.insert("principal".into(), "".into());
        data.insert("credentials".into(), base64_encoded_ticket.into().into());
        Self { data }
    }

    /// Create a token for connecting to a server without authentication.
    pub fn new_none_auth() -> Self {
        let mut data = HashMap::with_capacity(1);
        data.insert("scheme".into(), "none".into());
        Self { data }
    }

    /// Create a token for a custom authentication scheme (e.g., a server-side
    /// authentication plugin).
    pub fn new_custom_auth(
        principal: Option<String>,
        credentials: Option<String>,
        realm: Option<String>,
        scheme: Option<String>,
        parameters: Option<HashMap<String, ValueSend>>,
    ) -> Self {
        let mut data = HashMap::with_capacity(
            usize::from(principal.is_some())
                + usize::from(credentials.is_some())
                + usize::from(realm.is_some())
                + usize::from(scheme.is_some())
                + usize::from(parameters.is_some()),
        );
        if let Some(principal) = principal {
            data.insert("principal".into(), principal.into());
        }
        if let Some(credentials) = credentials {
            data.insert("credentials".into(), credentials.into());
        }
        if let Some(realm) = realm {
            data.insert("realm".into(), realm.into());
        }
        if let Some(scheme) = scheme {
            data.insert("scheme".into(), scheme.into());
        }
        if let Some(parameters) = parameters {
            data.insert("parameters".into(), ValueSend::Map(parameters));
        }
        Self { data }
    }

    /// Compare two tokens by their data.
    pub(crate) fn eq_data(&self, other: &Self) -> bool {
        if self.data.len() != other.data.len() {
            return false;
        }
        self.data.iter().all(|(k1, v1)| {
            other
                .data
                .get(k1)
                .map(|v2| eq_value_data(v1, v2))
                .unwrap_or(false)
        })
    }

    pub fn data(&self) -> &HashMap<String, ValueSend> {
        &self.data
    }
}

fn eq_value_data(v1: &ValueSend, v2: &ValueSend) -> bool {
    match v1 {
        ValueSend::Float(f1) => match v2 {
            // compare bit patterns so NaN == NaN
            ValueSend::Float(f2) => f1.to_bits() == f2.to_bits(),
            _ => false,
        },
        ValueSend::List(l1) => match v2 {
            ValueSend::List(l2) if l1.len() == l2.len() => l1
                .iter()
                .zip(l2.iter())
                .all(|(v1, v2)| eq_value_data(v1, v2)),
            _ => false,
        },
        ValueSend::Map(m1) => match v2 {
            ValueSend::Map(m2) if m1.len() == m2.len() => m1.iter().all(|(k1, v1)| {
                m2.get(k1).map(|v2| eq_value_data(v1, v2)).unwrap_or(false)
            }),
            _ => false,
        },
        v1 => v1 == v2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_token_shape() {
        let token = AuthToken::new_basic_auth("user", "secret");
        assert_eq!(token.data.get("scheme"), Some(&"basic".into()));
        assert_eq!(token.data.get("principal"), Some(&"user".into()));
        assert_eq!(token.data.get("credentials"), Some(&"secret".into()));
    }

    #[test]
    fn test_eq_data() {
        let token1 = AuthToken::new_basic_auth("user", "secret");
        let token2 = AuthToken::new_basic_auth("user", "secret");
        let token3 = AuthToken::new_basic_auth("user", "other");
        assert!(token1.eq_data(&token2));
        assert!(!token1.eq_data(&token3));
        assert!(!token1.eq_data(&AuthToken::new_none_auth()));
    }

    #[test]
    fn test_eq_data_nan_credentials() {
        let token1 = AuthToken::new_custom_auth(
            None,
            None,
            None,
            Some("custom".into()),
            Some([("x".into(), ValueSend::Float(f64::NAN))].into_iter().collect()),
        );
        let token2 = AuthToken::new_custom_auth(
            None,
            None,
            None,
            Some("custom".into()),
            Some([("x".into(), ValueSend::Float(f64::NAN))].into_iter().collect()),
        );
        assert!(token1.eq_data(&token2));
    }
}
