//! Minimal user model consumed by the event pipeline.
//!
//! Flag evaluation owns the full user API. The pipeline only needs to know the key, the standard
//! attributes, the custom attributes, and which of them the user asked to keep private.
use std::collections::{BTreeMap, HashSet};

use derive_more::Display;
use serde_json::Value;

/// A user attribute name.
///
/// `Custom` covers every attribute that is not one of the built-in ones.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
pub enum UserAttribute {
    #[display("key")]
    Key,
    #[display("secondary")]
    Secondary,
    #[display("ip")]
    Ip,
    #[display("country")]
    Country,
    #[display("email")]
    Email,
    #[display("firstName")]
    FirstName,
    #[display("lastName")]
    LastName,
    #[display("avatar")]
    Avatar,
    #[display("name")]
    Name,
    #[display("anonymous")]
    Anonymous,
    #[display("{_0}")]
    Custom(String),
}

impl UserAttribute {
    /// Built-in attributes that may be marked private, in the order they are reported in
    /// `privateAttrs`.
    pub const PRIVATABLE: [UserAttribute; 7] = [
        UserAttribute::Ip,
        UserAttribute::Country,
        UserAttribute::FirstName,
        UserAttribute::LastName,
        UserAttribute::Name,
        UserAttribute::Avatar,
        UserAttribute::Email,
    ];

    /// Resolve a wire name to an attribute. Unknown names are custom attributes.
    pub fn from_name(name: &str) -> UserAttribute {
        match name {
            "key" => UserAttribute::Key,
            "secondary" => UserAttribute::Secondary,
            "ip" => UserAttribute::Ip,
            "country" => UserAttribute::Country,
            "email" => UserAttribute::Email,
            "firstName" => UserAttribute::FirstName,
            "lastName" => UserAttribute::LastName,
            "avatar" => UserAttribute::Avatar,
            "name" => UserAttribute::Name,
            "anonymous" => UserAttribute::Anonymous,
            other => UserAttribute::Custom(other.to_owned()),
        }
    }

    /// `key`, `secondary` and `anonymous` are always sent.
    pub fn can_be_private(&self) -> bool {
        !matches!(
            self,
            UserAttribute::Key | UserAttribute::Secondary | UserAttribute::Anonymous
        )
    }

    fn is_built_in(&self) -> bool {
        !matches!(self, UserAttribute::Custom(_))
    }
}

/// Error reported by [`UserBuilder::build`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UserBuilderError {
    /// `as_private_attribute()` was applied to `key`, `secondary` or `anonymous`.
    #[error("user attribute `{0}` cannot be private")]
    CannotBePrivate(UserAttribute),
    /// `as_private_attribute()` was called before any attribute was set.
    #[error("as_private_attribute() called without a preceding attribute")]
    NoAttributeToMarkPrivate,
}

/// A user as seen by the event pipeline. Build one with [`User::builder`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct User {
    pub(crate) key: String,
    pub(crate) secondary: Option<String>,
    pub(crate) ip: Option<String>,
    pub(crate) country: Option<String>,
    pub(crate) email: Option<String>,
    pub(crate) first_name: Option<String>,
    pub(crate) last_name: Option<String>,
    pub(crate) avatar: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) anonymous: Option<bool>,
    pub(crate) custom: BTreeMap<String, Value>,
    pub(crate) private_attribute_names: HashSet<String>,
}

impl User {
    /// A user with only a key.
    pub fn with_key(key: impl Into<String>) -> User {
        User {
            key: key.into(),
            ..User::default()
        }
    }

    /// Start building a user with the given key.
    pub fn builder(key: impl Into<String>) -> UserBuilder {
        UserBuilder::new(key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn secondary(&self) -> Option<&str> {
        self.secondary.as_deref()
    }

    pub fn anonymous(&self) -> Option<bool> {
        self.anonymous
    }

    pub fn custom(&self) -> &BTreeMap<String, Value> {
        &self.custom
    }

    /// Value of a built-in string attribute.
    pub fn standard_attribute(&self, attribute: &UserAttribute) -> Option<&str> {
        match attribute {
            UserAttribute::Key => Some(&self.key),
            UserAttribute::Secondary => self.secondary.as_deref(),
            UserAttribute::Ip => self.ip.as_deref(),
            UserAttribute::Country => self.country.as_deref(),
            UserAttribute::Email => self.email.as_deref(),
            UserAttribute::FirstName => self.first_name.as_deref(),
            UserAttribute::LastName => self.last_name.as_deref(),
            UserAttribute::Avatar => self.avatar.as_deref(),
            UserAttribute::Name => self.name.as_deref(),
            UserAttribute::Anonymous | UserAttribute::Custom(_) => None,
        }
    }

    /// Attribute names this user marked private.
    pub fn private_attribute_names(&self) -> &HashSet<String> {
        &self.private_attribute_names
    }
}

/// Builder for [`User`].
///
/// Every setter returns the builder. [`UserBuilder::as_private_attribute`] applies to the
/// attribute set immediately before it; misuse is reported by [`UserBuilder::build`].
///
/// ```
/// # use flag_events::User;
/// let user = User::builder("user-key")
///     .name("Bob")
///     .email("bob@example.com")
///     .as_private_attribute()
///     .custom("plan", "gold")
///     .build()
///     .unwrap();
/// assert!(user.private_attribute_names().contains("email"));
/// ```
#[derive(Debug, Clone)]
pub struct UserBuilder {
    user: User,
    last_attribute: Option<UserAttribute>,
    error: Option<UserBuilderError>,
}

impl UserBuilder {
    pub fn new(key: impl Into<String>) -> UserBuilder {
        UserBuilder {
            user: User::with_key(key),
            last_attribute: None,
            error: None,
        }
    }

    pub fn secondary_key(mut self, secondary: impl Into<String>) -> UserBuilder {
        self.user.secondary = Some(secondary.into());
        self.last_attribute = Some(UserAttribute::Secondary);
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> UserBuilder {
        self.user.ip = Some(ip.into());
        self.last_attribute = Some(UserAttribute::Ip);
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> UserBuilder {
        self.user.country = Some(country.into());
        self.last_attribute = Some(UserAttribute::Country);
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> UserBuilder {
        self.user.email = Some(email.into());
        self.last_attribute = Some(UserAttribute::Email);
        self
    }

    pub fn first_name(mut self, first_name: impl Into<String>) -> UserBuilder {
        self.user.first_name = Some(first_name.into());
        self.last_attribute = Some(UserAttribute::FirstName);
        self
    }

    pub fn last_name(mut self, last_name: impl Into<String>) -> UserBuilder {
        self.user.last_name = Some(last_name.into());
        self.last_attribute = Some(UserAttribute::LastName);
        self
    }

    pub fn avatar(mut self, avatar: impl Into<String>) -> UserBuilder {
        self.user.avatar = Some(avatar.into());
        self.last_attribute = Some(UserAttribute::Avatar);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> UserBuilder {
        self.user.name = Some(name.into());
        self.last_attribute = Some(UserAttribute::Name);
        self
    }

    pub fn anonymous(mut self, anonymous: bool) -> UserBuilder {
        self.user.anonymous = Some(anonymous);
        self.last_attribute = Some(UserAttribute::Anonymous);
        self
    }

    /// Add a custom attribute. Names that collide with a built-in attribute are ignored.
    pub fn custom(mut self, name: impl Into<String>, value: impl Into<Value>) -> UserBuilder {
        let name = name.into();
        if UserAttribute::from_name(&name).is_built_in() {
            log::debug!(target: "flag_events", "ignoring custom attribute with built-in name {name:?}");
            self.last_attribute = None;
            return self;
        }
        self.user.custom.insert(name.clone(), value.into());
        self.last_attribute = Some(UserAttribute::Custom(name));
        self
    }

    /// Mark the attribute set by the previous call as private.
    pub fn as_private_attribute(mut self) -> UserBuilder {
        match self.last_attribute.take() {
            Some(attribute) if attribute.can_be_private() => {
                self.user.private_attribute_names.insert(attribute.to_string());
            }
            Some(attribute) => {
                self.error
                    .get_or_insert(UserBuilderError::CannotBePrivate(attribute));
            }
            None => {
                self.error
                    .get_or_insert(UserBuilderError::NoAttributeToMarkPrivate);
            }
        }
        self
    }

    /// Finish building. Fails if `as_private_attribute()` was misused at any point.
    pub fn build(self) -> Result<User, UserBuilderError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.user),
        }
    }
}
