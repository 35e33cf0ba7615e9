//! Google People API types, used for the signed-in user's own profile.

use serde::{Deserialize, Serialize};

/// Response of `people.get` for `people/me`.
///
/// See: <https://developers.google.com/people/api/rest/v1/people/get>
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Person {
    #[serde(rename = "resourceName", default)]
    pub resource_name: String,
    #[serde(default)]
    pub names: Vec<Name>,
    #[serde(rename = "emailAddresses", default)]
    pub email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    pub photos: Vec<Photo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Name {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmailAddress {
    pub value: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Photo {
    pub url: Option<String>,
    /// Set when the photo is the generated placeholder rather than one the user uploaded.
    #[serde(default)]
    pub default: bool,
}

impl Person {
    pub fn display_name(&self) -> Option<&str> {
        self.names.iter().find_map(|n| n.display_name.as_deref())
    }

    pub fn email(&self) -> Option<&str> {
        self.email_addresses.iter().find_map(|e| e.value.as_deref())
    }

    pub fn photo_url(&self) -> Option<&str> {
        self.photos.iter().find_map(|p| p.url.as_deref())
    }
}
