use serde::{Deserialize, Serialize};

/// A participant's display identity.
///
/// `email` only takes part in identity-collision checks and is never sent
/// over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub color: String,
    #[serde(default, skip_serializing)]
    pub email: Option<String>,
}

impl User {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Name used for collision checks; display keeps the original casing.
    pub fn name_key(&self) -> String {
        self.name.to_lowercase()
    }
}
