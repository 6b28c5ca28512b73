use std::fmt;

use secrecy::SecretString;

/// Environment variable holding the Docker Hub user name.
pub const DOCKERHUB_USERNAME_VAR: &str = "DOCKERHUB_USERNAME";
/// Environment variable holding the Docker Hub access token.
pub const DOCKERHUB_ACCESS_TOKEN_VAR: &str = "DOCKERHUB_ACCESS_TOKEN";

/// Docker Hub credentials used for the authenticated pull-through cache.
///
/// Both values must be present for the Docker Hub cache rule and its
/// credential secret to be created. The token is wrapped in
/// [`SecretString`] so it never shows up in logs or debug output.
#[derive(Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub access_token: SecretString,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl RegistryCredentials {
    /// Build credentials from optional raw values.
    ///
    /// Returns `None` when either value is missing or blank; the private
    /// mirror is then simply not configured.
    pub fn from_values(username: Option<String>, access_token: Option<String>) -> Option<Self> {
        let username = username.filter(|u| !u.trim().is_empty())?;
        let access_token = access_token.filter(|t| !t.trim().is_empty())?;
        Some(Self {
            username,
            access_token: SecretString::from(access_token),
        })
    }

    /// Read `DOCKERHUB_USERNAME` and `DOCKERHUB_ACCESS_TOKEN` from the
    /// process environment. Call once at startup and pass the result along.
    pub fn from_env() -> Option<Self> {
        // arch-lint: allow(no-silent-result-drop) reason="an unset variable means the private mirror is not configured"
        let username = std::env::var(DOCKERHUB_USERNAME_VAR).ok();
        // arch-lint: allow(no-silent-result-drop) reason="an unset variable means the private mirror is not configured"
        let access_token = std::env::var(DOCKERHUB_ACCESS_TOKEN_VAR).ok();
        let creds = Self::from_values(username, access_token);
        tracing::debug!(configured = creds.is_some(), "docker hub credentials");
        creds
    }
}
