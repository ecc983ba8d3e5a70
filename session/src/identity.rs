//! Sender identity for outgoing messages.
//!
//! Identity comes from an external session provider. A missing provider
//! answer, or a missing field, falls back to the anonymous values.

use envelope::DEFAULT_PROFILE_IMAGE;

pub const ANONYMOUS_NAME: &str = "Anonymous";
pub const ANONYMOUS_EMAIL: &str = "anonymous@example.com";

/// Role stamped on messages composed by this client.
pub const SENDER_ROLE: &str = "user";

/// What the identity provider knows about the active user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
}

/// Identity with every fallback applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub name: String,
    pub email: String,
    pub image: String,
}

impl Identity {
    #[must_use]
    pub fn resolve(&self) -> ResolvedIdentity {
        fn pick(value: Option<&String>, fallback: &str) -> String {
            value
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| fallback.to_owned())
        }

        ResolvedIdentity {
            name: pick(self.name.as_ref(), ANONYMOUS_NAME),
            email: pick(self.email.as_ref(), ANONYMOUS_EMAIL),
            image: pick(self.image.as_ref(), DEFAULT_PROFILE_IMAGE),
        }
    }
}

/// External session/auth collaborator.
pub trait IdentityProvider: Send + Sync {
    /// The active user, or `None` when nobody is signed in.
    fn current(&self) -> Option<Identity>;
}

/// Provider returning a fixed identity.
#[derive(Clone, Debug, Default)]
pub struct StaticIdentity(Option<Identity>);

impl StaticIdentity {
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self(Some(identity))
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Option<Identity> {
        self.0.clone()
    }
}
