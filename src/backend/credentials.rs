//! API key lookup for remote backends

/// Supplies the API key a remote backend sends with each request.
///
/// Passed explicitly into each remote backend so tests and callers decide
/// where keys come from.
pub trait CredentialProvider: Send + Sync {
    fn api_key(&self) -> Option<String>;
}

/// Reads the key from an environment variable at call time
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    var: String,
}

impl EnvCredentialProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn api_key(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// A fixed key, mostly for tests
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider(Option<String>);

impl StaticCredentialProvider {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Some(key.into()))
    }

    pub fn missing() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn api_key(&self) -> Option<String> {
        self.0.clone()
    }
}
