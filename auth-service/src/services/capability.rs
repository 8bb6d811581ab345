//! Optional collaborators resolved once at startup.

/// A collaborator that is either wired in or deliberately absent.
#[derive(Debug, Clone)]
pub enum Capability<T> {
    Enabled(T),
    Disabled,
}

impl<T> Capability<T> {
    /// `Enabled(value)` only when the policy switch is on.
    pub fn when(enabled: bool, value: T) -> Self {
        if enabled {
            Capability::Enabled(value)
        } else {
            Capability::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Capability::Enabled(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Capability<U> {
        match self {
            Capability::Enabled(value) => Capability::Enabled(f(value)),
            Capability::Disabled => Capability::Disabled,
        }
    }

    pub fn enabled(&self) -> Option<&T> {
        match self {
            Capability::Enabled(value) => Some(value),
            Capability::Disabled => None,
        }
    }
}

impl<T> From<Option<T>> for Capability<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Capability::Enabled(value),
            None => Capability::Disabled,
        }
    }
}
