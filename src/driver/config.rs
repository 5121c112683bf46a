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

pub(crate) mod auth;

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::result::Result as StdResult;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use thiserror::Error;
use uriparse::URI;

use crate::address_::resolution::AddressResolver;
use crate::address_::{Address, DEFAULT_PORT};
use crate::driver::record_stream::FETCH_ALL;
use crate::value::ValueSend;
use auth::AuthToken;

const DEFAULT_USER_AGENT: &str = concat!("graphbolt-rust/", env!("CARGO_PKG_VERSION"));
const DEFAULT_FETCH_SIZE: i64 = 1000;
const DEFAULT_CONNECTION_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_CONNECTION_POOL_SIZE: usize = 100;

/// How the driver works locally: authentication, pool sizing, timeouts,
/// custom address resolution.
pub struct DriverConfig {
    pub(crate) user_agent: String,
    pub(crate) auth: Arc<AuthToken>,
    pub(crate) max_connection_lifetime: Option<Duration>,
    pub(crate) max_connection_pool_size: usize,
    pub(crate) connection_timeout: Option<Duration>,
    pub(crate) connection_acquisition_timeout: Option<Duration>,
    pub(crate) keep_alive: Option<KeepAliveConfig>,
    pub(crate) resolver: Option<Box<dyn AddressResolver>>,
    pub(crate) fetch_size: i64,
    pub(crate) idle_time_before_connection_test: Option<Duration>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum KeepAliveConfig {
    /// Enable TCP keep-alive with the OS default probing time.
    Default,
    /// Enable TCP keep-alive with the given probing time.
    CustomTime(Duration),
}

impl Debug for DriverConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConfig")
            .field("user_agent", &self.user_agent)
            .field("auth", &"...")
            .field("max_connection_lifetime", &self.max_connection_lifetime)
            .field("max_connection_pool_size", &self.max_connection_pool_size)
            .field("connection_timeout", &self.connection_timeout)
            .field(
                "connection_acquisition_timeout",
                &self.connection_acquisition_timeout,
            )
            .field("keep_alive", &self.keep_alive)
            .field("resolver", &self.resolver.as_ref().map(|_| "..."))
            .field("fetch_size", &self.fetch_size)
            .field(
                "idle_time_before_connection_test",
                &self.idle_time_before_connection_test,
            )
            .finish()
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            user_agent: String::from(DEFAULT_USER_AGENT),
            auth: Arc::new(AuthToken::new_none_auth()),
            max_connection_lifetime: Some(Duration::from_secs(3600)),
            max_connection_pool_size: DEFAULT_MAX_CONNECTION_POOL_SIZE,
            connection_timeout: Some(Duration::from_secs(30)),
            connection_acquisition_timeout: Some(DEFAULT_CONNECTION_ACQUISITION_TIMEOUT),
            keep_alive: None,
            resolver: None,
            fetch_size: DEFAULT_FETCH_SIZE,
            idle_time_before_connection_test: None,
        }
    }
}

impl DriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the user agent announced to the server.
    ///
    /// The default contains the crate name and version.
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_auth(mut self, auth: Arc<AuthToken>) -> Self {
        self.auth = auth;
        self
    }

    /// Connections older than this are discarded on the next acquisition
    /// attempt instead of being reused.
    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_connection_lifetime = Some(lifetime);
        self
    }

    pub fn without_max_connection_lifetime(mut self) -> Self {
        self.max_connection_lifetime = None;
        self
    }

    /// Upper bound of connections the pool keeps per server address.
    pub fn with_max_connection_pool_size(mut self, max_connection_pool_size: usize) -> Self {
        self.max_connection_pool_size = max_connection_pool_size;
        self
    }

    /// Maximum time to wait for a TCP connection to be established.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    pub fn without_connection_timeout(mut self) -> Self {
        self.connection_timeout = None;
        self
    }

    /// Maximum time to wait for a connection from the pool, covering
    /// connection creation, routing-table refreshes, and waiting for a slot
    /// in a pool at capacity.
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.connection_acquisition_timeout = Some(timeout);
        self
    }

    pub fn without_connection_acquisition_timeout(mut self) -> Self {
        self.connection_acquisition_timeout = None;
        self
    }

    pub fn with_keep_alive(mut self) -> Self {
        self.keep_alive = Some(KeepAliveConfig::Default);
        self
    }

    pub fn with_keep_alive_time(mut self, time: Duration) -> Self {
        self.keep_alive = Some(KeepAliveConfig::CustomTime(time));
        self
    }

    pub fn without_keep_alive(mut self) -> Self {
        self.keep_alive = None;
        self
    }

    /// Register a custom resolver expanding every address (e.g., a seed
    /// router) into candidate addresses before DNS resolution.
    pub fn with_resolver(mut self, resolver: Box<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn without_resolver(mut self) -> Self {
        self.resolver = None;
        self
    }

    /// How many records to request per batch when streaming results.
    pub fn with_fetch_size(mut self, fetch_size: i64) -> StdResult<Self, ConfigureFetchSizeError<Self>> {
        if fetch_size > 0 {
            self.fetch_size = fetch_size;
            Ok(self)
        } else {
            Err(ConfigureFetchSizeError { builder: self })
        }
    }

    /// Request complete result streams in a single batch.
    pub fn with_fetch_all(mut self) -> Self {
        self.fetch_size = FETCH_ALL;
        self
    }

    pub fn with_default_fetch_size(mut self) -> Self {
        self.fetch_size = DEFAULT_FETCH_SIZE;
        self
    }

    /// Pooled connections idle for longer than this are tested with a
    /// round-trip before reuse. By default, no such liveness check is
    /// performed.
    pub fn with_idle_time_before_connection_test(mut self, idle_time: Duration) -> Self {
        self.idle_time_before_connection_test = Some(idle_time);
        self
    }

    pub fn without_idle_time_before_connection_test(mut self) -> Self {
        self.idle_time_before_connection_test = None;
        self
    }
}

/// Returned when a fetch size was rejected (it must be positive).
/// Contains the unmodified builder to continue with.
#[derive(Debug, Error)]
#[error("fetch size must be positive, use with_fetch_all() for fetching complete streams")]
pub struct ConfigureFetchSizeError<Builder> {
    pub builder: Builder,
}

/// Where and how to connect to the DBMS: address, routing on/off (plus
/// routing context), and transport encryption.
///
/// Can be parsed from a URI: `scheme://host[:port[?routing_context]]` with
/// scheme being one of
///  * `bolt`: direct connection, no encryption,
///  * `bolt+s`: direct connection, TLS against the system's trusted CAs,
///  * `bolt+ssc`: direct connection, TLS accepting any certificate,
///  * `neo4j`, `neo4j+s`, `neo4j+ssc`: like the above, but with routing.
pub struct ConnectionConfig {
    pub(crate) address: Address,
    pub(crate) routing_context: Option<HashMap<String, ValueSend>>,
    pub(crate) tls_config: Option<ClientConfig>,
}

impl Debug for ConnectionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("address", &self.address)
            .field("routing_context", &self.routing_context)
            .field("tls_config", &self.tls_config.as_ref().map(|_| "..."))
            .finish()
    }
}

impl ConnectionConfig {
    /// A direct, unencrypted connection to the given address.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            routing_context: None,
            tls_config: None,
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    /// Enable or disable routing (treating the address as the seed router of
    /// a cluster).
    pub fn with_routing(mut self, routing: bool) -> Self {
        if !routing {
            self.routing_context = None
        } else if self.routing_context.is_none() {
            self.routing_context = Some(HashMap::new());
        }
        self
    }

    /// Enable routing with the given routing context, which is passed along
    /// to the cluster's routers to influence the returned routing tables.
    ///
    /// The key `"address"` is reserved for the driver.
    pub fn with_routing_context(
        mut self,
        routing_context: HashMap<String, String>,
    ) -> StdResult<Self, InvalidRoutingContextError> {
        if routing_context.contains_key("address") {
            return Err(InvalidRoutingContextError {
                message: "routing context cannot contain key \"address\"",
            });
        }
        self.routing_context = Some(
            routing_context
                .into_iter()
                .map(|(k, v)| (k, v.into()))
                .collect(),
        );
        Ok(self)
    }

    /// Encrypt the connection, trusting the system's default CAs.
    pub fn with_encryption_trust_default_cas(mut self) -> StdResult<Self, TlsConfigError> {
        self.tls_config = Some(tls_helper::secure_tls_config()?);
        Ok(self)
    }

    /// Encrypt the connection, trusting the root certificates found in the
    /// given PEM files instead of the system's CAs.
    pub fn with_encryption_trust_custom_cas<P: AsRef<Path>>(
        mut self,
        paths: &[P],
    ) -> StdResult<Self, TlsConfigError> {
        self.tls_config = Some(tls_helper::custom_ca_tls_config(paths)?);
        Ok(self)
    }

    /// Encrypt the connection, but accept any certificate the server
    /// presents.
    ///
    /// This provides no protection against man-in-the-middle attacks; it only
    /// defends against passive eavesdropping. Intended for test setups with
    /// self-signed certificates.
    pub fn with_encryption_trust_any_certificate(mut self) -> Self {
        self.tls_config = Some(tls_helper::self_signed_tls_config());
        self
    }

    /// Encrypt the connection with a fully custom `rustls` configuration.
    pub fn with_encryption_custom_tls_config(mut self, tls_config: ClientConfig) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    /// Do not encrypt the connection. This is the *default*.
    pub fn with_encryption_disabled(mut self) -> Self {
        self.tls_config = None;
        self
    }

    fn parse_uri(uri: &str) -> StdResult<ConnectionConfig, ConnectionConfigParseError> {
        let uri = URI::try_from(uri).map_err(URIError)?;

        let (routing, tls_config) = match uri.scheme().as_str() {
            "neo4j" => (true, None),
            "neo4j+s" => (true, Some(tls_helper::secure_tls_config()?)),
            "neo4j+ssc" => (true, Some(tls_helper::self_signed_tls_config())),
            "bolt" => (false, None),
            "bolt+s" => (false, Some(tls_helper::secure_tls_config()?)),
            "bolt+ssc" => (false, Some(tls_helper::self_signed_tls_config())),
            scheme => {
                return Err(ConnectionConfigParseError(format!(
                    "unknown scheme in URI {} expected `neo4j`, `neo4j+s`, `neo4j+ssc`, \
                     `bolt`, `bolt+s`, or `bolt+ssc`",
                    scheme
                )))
            }
        };

        let authority = uri
            .authority()
            .ok_or(ConnectionConfigParseError(String::from(
                "missing host in URI",
            )))?;
        if authority.has_username() {
            return Err(ConnectionConfigParseError(format!(
                "URI cannot contain a username, found: {}",
                authority.username().unwrap()
            )));
        }
        if authority.has_password() {
            return Err(ConnectionConfigParseError(String::from(
                "URI cannot contain a password",
            )));
        }
        let host = authority.host().to_string();
        let port = authority.port().unwrap_or(DEFAULT_PORT);

        let path = uri.path().to_string();
        if !path.is_empty() && path != "/" {
            return Err(ConnectionConfigParseError(format!(
                "URI cannot contain a path, found: {}",
                path
            )));
        }

        let routing_context = match uri.query() {
            None => {
                if routing {
                    Some(HashMap::new())
                } else {
                    None
                }
            }
            Some(query) => {
                if query.as_str().is_empty() {
                    if routing {
                        Some(HashMap::new())
                    } else {
                        None
                    }
                } else {
                    if !routing {
                        return Err(ConnectionConfigParseError(format!(
                            "URI with bolt scheme cannot contain a query (routing context), \
                             found: {}",
                            query,
                        )));
                    }
                    Some(Self::parse_query(query.as_str())?)
                }
            }
        };

        if let Some(fragment) = uri.fragment() {
            return Err(ConnectionConfigParseError(format!(
                "URI cannot contain a fragment, found: {}",
                fragment
            )));
        }

        Ok(ConnectionConfig {
            address: (host, port).into(),
            routing_context,
            tls_config,
        })
    }

    fn parse_query(
        query: &str,
    ) -> StdResult<HashMap<String, ValueSend>, ConnectionConfigParseError> {
        let mut result = HashMap::new();
        for key_value in query.split('&') {
            let Some((key, value)) = key_value.split_once('=') else {
                return Err(ConnectionConfigParseError(format!(
                    "couldn't parse key=value pair '{}' in '{}'",
                    key_value, query
                )));
            };
            if key == "address" {
                return Err(ConnectionConfigParseError(String::from(
                    "routing context cannot contain key \"address\"",
                )));
            }
            result.insert(key.to_string(), value.to_string().into());
        }
        Ok(result)
    }
}

impl TryFrom<&str> for ConnectionConfig {
    type Error = ConnectionConfigParseError;

    fn try_from(value: &str) -> StdResult<Self, Self::Error> {
        Self::parse_uri(value)
    }
}

impl FromStr for ConnectionConfig {
    type Err = ConnectionConfigParseError;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        Self::try_from(s)
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConnectionConfigParseError(String);

struct URIError(uriparse::URIError);

impl From<URIError> for ConnectionConfigParseError {
    fn from(e: URIError) -> Self {
        ConnectionConfigParseError(format!("couldn't parse URI: {}", e.0))
    }
}

impl From<TlsConfigError> for ConnectionConfigParseError {
    fn from(e: TlsConfigError) -> Self {
        ConnectionConfigParseError(format!("couldn't configure TLS: {e}"))
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct InvalidRoutingContextError {
    message: &'static str,
}

/// Failed to build a TLS configuration, e.g., because the system's trust
/// store could not be loaded or a custom CA file was unreadable.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TlsConfigError {
    pub message: String,
}

pub(crate) mod tls_helper {
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;
    use std::result::Result as StdResult;
    use std::sync::Arc;

    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
    use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls_platform_verifier::ConfigVerifierExt;

    use super::TlsConfigError;

    pub(crate) fn secure_tls_config() -> StdResult<ClientConfig, TlsConfigError> {
        Ok(ClientConfig::with_platform_verifier())
    }

    pub(crate) fn custom_ca_tls_config<P: AsRef<Path>>(
        paths: &[P],
    ) -> StdResult<ClientConfig, TlsConfigError> {
        let mut root_store = RootCertStore::empty();
        for path in paths {
            let path = path.as_ref();
            let file = File::open(path).map_err(|e| TlsConfigError {
                message: format!("failed to open CA file {}: {e}", path.display()),
            })?;
            let mut reader = BufReader::new(file);
            for cert_res in rustls_pemfile::certs(&mut reader) {
                let cert = cert_res.map_err(|e| TlsConfigError {
                    message: format!("failed to parse CA file {}: {e}", path.display()),
                })?;
                root_store.add(cert).map_err(|e| TlsConfigError {
                    message: format!("failed to load CA from {}: {e}", path.display()),
                })?;
            }
        }
        Ok(ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth())
    }

    pub(crate) fn self_signed_tls_config() -> ClientConfig {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NonVerifyingVerifier {}))
            .with_no_client_auth()
    }

    /// Accepts any certificate: encryption without authentication.
    #[derive(Debug)]
    struct NonVerifyingVerifier {}

    impl ServerCertVerifier for NonVerifyingVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> StdResult<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> StdResult<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> StdResult<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA1,
                SignatureScheme::ECDSA_SHA1_Legacy,
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
                SignatureScheme::ED448,
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("bolt://localhost", "localhost", DEFAULT_PORT, false, false)]
    #[case("bolt://localhost:7688", "localhost", 7688, false, false)]
    #[case("neo4j://cluster.example.com", "cluster.example.com", DEFAULT_PORT, true, false)]
    #[case("neo4j://cluster.example.com:17687", "cluster.example.com", 17687, true, false)]
    fn test_parse_uri(
        #[case] uri: &str,
        #[case] host: &str,
        #[case] port: u16,
        #[case] routing: bool,
        #[case] encrypted: bool,
    ) {
        let config: ConnectionConfig = uri.try_into().unwrap();
        assert_eq!(config.address.host(), host);
        assert_eq!(config.address.port(), port);
        assert_eq!(config.routing_context.is_some(), routing);
        assert_eq!(config.tls_config.is_some(), encrypted);
    }

    #[test]
    fn test_parse_uri_with_routing_context() {
        let config: ConnectionConfig = "neo4j://example.com?policy=eu&region=west"
            .try_into()
            .unwrap();
        let routing_context = config.routing_context.unwrap();
        assert_eq!(routing_context.get("policy"), Some(&"eu".into()));
        assert_eq!(routing_context.get("region"), Some(&"west".into()));
    }

    #[rstest]
    #[case("http://localhost")]
    #[case("bolt://user@localhost")]
    #[case("bolt://localhost?key=value")]
    #[case("neo4j://localhost?address=invalid")]
    #[case("neo4j://localhost#fragment")]
    fn test_parse_invalid_uri(#[case] uri: &str) {
        let res: StdResult<ConnectionConfig, _> = uri.try_into();
        assert!(res.is_err(), "expected {uri} to be rejected");
    }

    #[test]
    fn test_routing_context_rejects_address_key() {
        let res = ConnectionConfig::new(("localhost", 7687).into()).with_routing_context(
            [(String::from("address"), String::from("anywhere:1234"))]
                .into_iter()
                .collect(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_fetch_size_validation() {
        assert!(DriverConfig::new().with_fetch_size(1000).is_ok());
        let res = DriverConfig::new().with_fetch_size(0);
        assert!(res.is_err());
        // the builder is handed back for recovery
        let builder = res.unwrap_err().builder;
        assert_eq!(builder.fetch_size, DEFAULT_FETCH_SIZE);
    }
}
