//! Redacted projection of a [`User`] for inclusion in analytics events.
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::{
    user::{User, UserAttribute},
    EventsConfig,
};

/// A user as it appears on the wire.
///
/// Every optional attribute is either present or its name is listed in `private_attrs`, never
/// both. `key`, `secondary` and `anonymous` are always kept.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventUser {
    pub key: String,
    pub secondary: Option<String>,
    pub ip: Option<String>,
    pub country: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub email: Option<String>,
    pub anonymous: Option<bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub private_attrs: Vec<String>,
}

impl EventUser {
    /// Project `user` according to the privacy settings in `config` and the user's own private
    /// attribute names.
    pub fn from_user(user: &User, config: &EventsConfig) -> EventUser {
        let mut redactor = Redactor {
            user,
            config,
            private_attrs: Vec::new(),
        };

        let ip = redactor.standard(UserAttribute::Ip, &user.ip);
        let country = redactor.standard(UserAttribute::Country, &user.country);
        let first_name = redactor.standard(UserAttribute::FirstName, &user.first_name);
        let last_name = redactor.standard(UserAttribute::LastName, &user.last_name);
        let name = redactor.standard(UserAttribute::Name, &user.name);
        let avatar = redactor.standard(UserAttribute::Avatar, &user.avatar);
        let email = redactor.standard(UserAttribute::Email, &user.email);

        let mut custom = BTreeMap::new();
        for (attr_name, value) in &user.custom {
            if redactor.is_private(attr_name) {
                redactor.private_attrs.push(attr_name.clone());
            } else {
                custom.insert(attr_name.clone(), value.clone());
            }
        }

        EventUser {
            key: user.key.clone(),
            secondary: user.secondary.clone(),
            ip,
            country,
            first_name,
            last_name,
            name,
            avatar,
            email,
            // `false` is the default on the collector side.
            anonymous: user.anonymous.filter(|anonymous| *anonymous),
            custom,
            private_attrs: redactor.private_attrs,
        }
    }
}

struct Redactor<'a> {
    user: &'a User,
    config: &'a EventsConfig,
    private_attrs: Vec<String>,
}

impl Redactor<'_> {
    fn is_private(&self, name: &str) -> bool {
        self.config.all_attributes_private
            || self.config.private_attribute_names.contains(name)
            || self.user.private_attribute_names.contains(name)
    }

    fn standard(&mut self, attribute: UserAttribute, value: &Option<String>) -> Option<String> {
        let value = value.as_ref()?;
        let name = attribute.to_string();
        if self.is_private(&name) {
            self.private_attrs.push(name);
            None
        } else {
            Some(value.clone())
        }
    }
}
