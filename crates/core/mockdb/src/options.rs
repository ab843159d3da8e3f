//! Option keys understood by the interception layer.
//!
//! Options travel as a flat string map, the same shape a native driver accepts.
//! Every key listed in [`OptionKey`] is reserved: it is consumed while resolving
//! a mock and never reaches the real driver.

use std::collections::BTreeMap;

/// A flat `name -> value` option set.
pub type Options = BTreeMap<String, String>;

/// Option keys reserved by the mocking layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    /// Connection string of the configuration connection
    Url,
    /// Port the ephemeral instance listens on
    MockPort,
    /// Directory holding the four external tools
    BinLocation,
    /// Host of the reference engine
    OriginalHost,
    /// Port of the reference engine
    OriginalPort,
    User,
    Password,
    /// Database name
    Name,
    /// Staging directory override
    TempFolder,
    /// Derived fingerprint of the reference database
    MockKey,
}

impl OptionKey {
    /// All reserved keys, in declaration order.
    pub const ALL: [OptionKey; 10] = [
        OptionKey::Url,
        OptionKey::MockPort,
        OptionKey::BinLocation,
        OptionKey::OriginalHost,
        OptionKey::OriginalPort,
        OptionKey::User,
        OptionKey::Password,
        OptionKey::Name,
        OptionKey::TempFolder,
        OptionKey::MockKey,
    ];

    /// The option name as it appears in option sets and query strings.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::MockPort => "mockPort",
            Self::BinLocation => "binLocation",
            Self::OriginalHost => "originalHost",
            Self::OriginalPort => "port",
            Self::User => "user",
            Self::Password => "password",
            Self::Name => "name",
            Self::TempFolder => "tempFolder",
            Self::MockKey => "mockKey",
        }
    }

    /// Looks up a reserved key by name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(name))
    }

    /// Whether `name` is exactly one of the reserved option names.
    pub fn is_reserved(name: &str) -> bool {
        Self::ALL.iter().any(|key| key.as_str() == name)
    }

    /// Returns the non-empty value stored under this key.
    pub fn get<'a>(&self, options: &'a Options) -> Option<&'a str> {
        options
            .get(self.as_str())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

impl std::fmt::Display for OptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
