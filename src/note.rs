//! Note model
//!
//! Read-only records received from the server, plus the draft sent when
//! composing a note. Field names follow the server's camelCase JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A note as delivered on a timeline channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(default)]
    pub id: String,
    pub user: User,
    #[serde(default)]
    pub text: Option<String>,
    /// Quoted or re-shared note
    #[serde(default)]
    pub renote: Option<Box<Note>>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

/// Author of a note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    pub username: String,
    /// Home server of a remote author, `None` for local accounts
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub is_cat: bool,
    #[serde(default)]
    pub is_bot: bool,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: None,
            username: username.into(),
            host: None,
            is_cat: false,
            is_bot: false,
        }
    }

    /// Set the display name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the remote host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn kind(&self) -> AuthorKind {
        if self.is_cat {
            AuthorKind::Cat
        } else if self.is_bot {
            AuthorKind::Automated
        } else {
            AuthorKind::Person
        }
    }
}

/// What kind of account authored a note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorKind {
    Cat,
    Automated,
    Person,
}

impl Note {
    pub fn new(user: User) -> Self {
        Self {
            id: String::new(),
            user,
            text: None,
            renote: None,
            visibility: None,
        }
    }

    /// Set the body text
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Nest a quoted note
    pub fn renote(mut self, note: Note) -> Self {
        self.renote = Some(Box::new(note));
        self
    }
}

/// Audience of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Home,
    Followers,
    Specified,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Home => "home",
            Visibility::Followers => "followers",
            Visibility::Specified => "specified",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown visibility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidVisibility(pub String);

impl fmt::Display for InvalidVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "visibility must be one of 'home', 'public', 'followers', or 'specified', got '{}'",
            self.0
        )
    }
}

impl std::error::Error for InvalidVisibility {}

impl FromStr for Visibility {
    type Err = InvalidVisibility;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "home" => Ok(Visibility::Home),
            "followers" => Ok(Visibility::Followers),
            "specified" => Ok(Visibility::Specified),
            other => Err(InvalidVisibility(other.to_string())),
        }
    }
}

/// Payload of a `notes/create` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    /// Server default when `None`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    pub text: String,
}

impl NoteDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            visibility: None,
            text: text.into(),
        }
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }
}
