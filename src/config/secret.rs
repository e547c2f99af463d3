//! Secret configuration values
//!
//! The queue database connection string, the source password and the source
//! bearer token are `SecretString`s. They are zeroed on drop, print as
//! `Secret([REDACTED])` and are read with `expose_secret().as_str()`.

use secrecy::{CloneableSecret, DebugSecret, Secret, SerializableSecret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Credential text held inside a [`SecretString`]
#[derive(Clone, Debug, Zeroize)]
#[zeroize(drop)]
pub struct SecretValue(String);

impl CloneableSecret for SecretValue {}
impl DebugSecret for SecretValue {}
impl SerializableSecret for SecretValue {}

impl SecretValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SecretValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for SecretValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecretValue)
    }
}

/// Zeroized, redacted string used for credentials in the configuration
pub type SecretString = Secret<SecretValue>;

/// Wraps a connection string, password or token read from the environment
///
/// ```rust
/// use aggregator::config::secret_string;
/// use secrecy::ExposeSecret;
///
/// let token = secret_string("abc123".to_string());
/// assert_eq!(token.expose_secret().as_str(), "abc123");
/// ```
pub fn secret_string(value: String) -> SecretString {
    Secret::new(SecretValue(value))
}
