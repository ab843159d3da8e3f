//! Connection fingerprint resolution.
//!
//! Turns an intercepted connection string plus the caller's options into a
//! [`ResolvedRequest`]: a validated description of the reference database and
//! of the ephemeral instance that should stand in for it. The request carries a
//! [`MockKey`] identifying the reference database; requests with equal keys
//! share one ephemeral instance.
//!
//! # Connection string
//!
//! ```text
//! mysql+mock://host[:refPort]/dbName[?k=v&k2=v2...]
//! ```
//!
//! Values found in the connection string only fill options the caller did not
//! supply. Query pairs are decoded one by one and a malformed pair is skipped
//! without failing the whole resolution.

use std::{
    borrow::Cow,
    net::{IpAddr, ToSocketAddrs as _},
    path::PathBuf,
};

use percent_encoding::percent_decode_str;
use url::Url;

use crate::{
    options::{OptionKey, Options},
    redacted::Redacted,
};

/// Reserved scheme prefix of connection strings handled by the mocking layer.
pub const MOCK_URL_PREFIX: &str = "mysql+mock://";

/// Reference host assumed when the connection string omits one.
const DEFAULT_HOST: &str = "localhost";

/// Whether `url` carries the reserved prefix and something after it.
pub fn recognizes(url: &str) -> bool {
    url.starts_with(MOCK_URL_PREFIX) && !url.eq_ignore_ascii_case(MOCK_URL_PREFIX)
}

/// Identity of a reference database: resolved host address, reference port and
/// database name.
///
/// Two requests with the same key are served by the same ephemeral instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MockKey {
    ip: IpAddr,
    reference_port: Option<u16>,
    database: String,
}

impl MockKey {
    pub fn new(ip: IpAddr, reference_port: Option<u16>, database: impl Into<String>) -> Self {
        Self {
            ip,
            reference_port,
            database: database.into(),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn reference_port(&self) -> Option<u16> {
        self.reference_port
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

impl std::fmt::Display for MockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reference_port {
            Some(port) => write!(f, "{}:{}:{}", self.ip, port, self.database),
            None => write!(f, "{}::{}", self.ip, self.database),
        }
    }
}

/// A validated, normalized connection attempt against a mock connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    /// Host of the reference engine, as written by the caller
    pub reference_host: String,
    /// Port of the reference engine, if any
    pub reference_port: Option<u16>,
    /// Port the ephemeral instance must listen on
    pub mock_port: u16,
    pub database_name: String,
    /// Account used to snapshot the reference schema
    pub user: Option<String>,
    pub password: Option<Redacted<String>>,
    /// Directory holding the external tools; falls back to the process default when absent
    pub bin_location: Option<PathBuf>,
    /// Staging directory override
    pub temp_folder: Option<PathBuf>,
    /// Unrecognized options, forwarded to the real connection
    pub pass_through: Options,
    pub mock_key: MockKey,
}

/// Resolves a connection string against the caller's options.
///
/// Returns `Ok(None)` when the string is not a mock connection string; callers
/// must pass such strings through untouched.
pub fn resolve(url: &str, supplied: &Options) -> Result<Option<ResolvedRequest>, ResolveError> {
    if !recognizes(url) {
        return Ok(None);
    }

    let parsed = Url::parse(url).map_err(|source| ResolveError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;

    let mut options = supplied.clone();

    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .unwrap_or(DEFAULT_HOST);
    fill(&mut options, OptionKey::OriginalHost.as_str(), host);

    let path = parsed.path().strip_prefix('/').unwrap_or(parsed.path());
    let database = percent_decode_str(path).decode_utf8_lossy();
    fill(&mut options, OptionKey::Name.as_str(), &database);

    if let Some(query) = parsed.query() {
        for (name, value) in query_pairs(query) {
            fill(&mut options, &name, &value);
        }
    }

    if let Some(port) = parsed.port() {
        fill(&mut options, OptionKey::OriginalPort.as_str(), &port.to_string());
    }

    let request = request_from_options(options)?;

    tracing::debug!(
        mock_key = %request.mock_key,
        mock_port = request.mock_port,
        "resolved mock connection request"
    );

    Ok(Some(request))
}

/// Validates a fully merged option set and computes its mock key.
fn request_from_options(options: Options) -> Result<ResolvedRequest, ResolveError> {
    let reference_host = OptionKey::OriginalHost
        .get(&options)
        .unwrap_or(DEFAULT_HOST)
        .to_string();
    let reference_port = parse_port(&options, OptionKey::OriginalPort)?;
    let mock_port =
        parse_port(&options, OptionKey::MockPort)?.ok_or(ResolveError::MissingOption {
            key: OptionKey::MockPort,
        })?;
    let database_name = OptionKey::Name
        .get(&options)
        .ok_or(ResolveError::MissingOption {
            key: OptionKey::Name,
        })?
        .to_string();

    let mock_key = MockKey::new(
        resolve_host_ip(&reference_host)?,
        reference_port,
        database_name.clone(),
    );

    let user = OptionKey::User.get(&options).map(str::to_string);
    let password = OptionKey::Password
        .get(&options)
        .map(|password| Redacted::from(password.to_string()));
    let bin_location = OptionKey::BinLocation.get(&options).map(PathBuf::from);
    let temp_folder = OptionKey::TempFolder.get(&options).map(PathBuf::from);

    let pass_through = options
        .into_iter()
        .filter(|(name, _)| !OptionKey::is_reserved(name))
        .collect();

    Ok(ResolvedRequest {
        reference_host,
        reference_port,
        mock_port,
        database_name,
        user,
        password,
        bin_location,
        temp_folder,
        pass_through,
        mock_key,
    })
}

/// Inserts `value` under `name` unless the caller already supplied it.
fn fill(options: &mut Options, name: &str, value: &str) {
    if !options.contains_key(name) {
        options.insert(name.to_string(), value.to_string());
    }
}

/// Splits a raw query string into decoded `(name, value)` pairs.
///
/// Pairs without `=`, with an empty name or value, or whose value does not
/// decode to UTF-8 are dropped.
fn query_pairs(query: &str) -> impl Iterator<Item = (String, String)> + '_ {
    query.split('&').filter_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.is_empty() || value.is_empty() {
            return None;
        }
        let value = value.replace('+', " ");
        let value = percent_decode_str(&value).decode_utf8().ok()?;
        Some((name.to_string(), Cow::into_owned(value)))
    })
}

fn parse_port(options: &Options, key: OptionKey) -> Result<Option<u16>, ResolveError> {
    let Some(value) = key.get(options) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<u16>()
        .map(Some)
        .map_err(|_| ResolveError::InvalidPort {
            key,
            value: value.to_string(),
        })
}

/// Resolves `host` to the address used in the mock key.
///
/// IP literals (including bracketed IPv6) are taken as-is. Names go through the
/// system resolver and the first IPv4 address wins, so that `localhost` and
/// `127.0.0.1` fingerprint identically.
pub fn resolve_host_ip(host: &str) -> Result<IpAddr, ResolveError> {
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<IpAddr> = (host, 0)
        .to_socket_addrs()
        .map_err(|source| ResolveError::HostResolution {
            host: host.to_string(),
            source,
        })?
        .map(|addr| addr.ip())
        .collect();

    addrs
        .iter()
        .copied()
        .find(IpAddr::is_ipv4)
        .or_else(|| addrs.first().copied())
        .ok_or_else(|| ResolveError::HostResolution {
            host: host.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "host resolved to no addresses",
            ),
        })
}

/// Errors raised while resolving a mock connection request
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// A mandatory option is absent from both the options and the connection string
    #[error("missing mandatory configuration parameter '{key}'")]
    MissingOption { key: OptionKey },

    /// A port option is not a valid TCP port number
    #[error("configuration parameter '{key}' is not a valid port: '{value}'")]
    InvalidPort { key: OptionKey, value: String },

    /// The connection string carries the mock prefix but is not a valid URL
    #[error("invalid mock connection string '{url}'")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The reference host could not be resolved to an address
    #[error("failed to resolve reference host '{host}'")]
    HostResolution {
        host: String,
        #[source]
        source: std::io::Error,
    },
}
