use std::fmt;
use std::sync::Arc;

/// Value sent in the `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Sent as `Bearer <token>`
    Bearer(String),
    /// Sent verbatim
    Raw(String),
}

impl Credential {
    /// `None` for an empty credential.
    pub fn header_value(&self) -> Option<String> {
        match self {
            Credential::Bearer(token) if !token.is_empty() => Some(format!("Bearer {}", token)),
            Credential::Raw(value) if !value.is_empty() => Some(value.clone()),
            _ => None,
        }
    }
}

/// Source of the credential attached to every request.
#[derive(Clone, Default)]
pub enum Auth {
    #[default]
    None,
    Static(Credential),
    /// Evaluated again for every request
    Dynamic(Arc<dyn Fn() -> Option<Credential> + Send + Sync>),
}

impl Auth {
    pub fn bearer(token: impl Into<String>) -> Self {
        Auth::Static(Credential::Bearer(token.into()))
    }

    pub fn dynamic(f: impl Fn() -> Option<Credential> + Send + Sync + 'static) -> Self {
        Auth::Dynamic(Arc::new(f))
    }

    pub fn header_value(&self) -> Option<String> {
        match self {
            Auth::None => None,
            Auth::Static(credential) => credential.header_value(),
            Auth::Dynamic(f) => f().and_then(|credential| credential.header_value()),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Static(_) => f.write_str("Static(..)"),
            Auth::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_static_credentials() {
        assert_eq!(Auth::bearer("t0k").header_value().as_deref(), Some("Bearer t0k"));
        assert_eq!(
            Auth::Static(Credential::Raw("Token abc".into())).header_value().as_deref(),
            Some("Token abc")
        );
        assert_eq!(Auth::bearer("").header_value(), None);
        assert_eq!(Auth::None.header_value(), None);
    }

    #[test]
    fn test_dynamic_is_evaluated_per_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let auth = Auth::dynamic(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Some(Credential::Bearer(format!("token-{}", n)))
        });
        assert_eq!(auth.header_value().as_deref(), Some("Bearer token-0"));
        assert_eq!(auth.header_value().as_deref(), Some("Bearer token-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
