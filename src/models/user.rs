use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Role of a user within the tracker. Stored as a lowercase string
/// ("admin" / "user") for compatibility with the user records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "user")]
    Member,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Maps the identity provider's role string into the closed enum.
    /// Anything unrecognized is a plain member.
    pub fn from_claim(role: &str) -> Self {
        if role == "admin" {
            Role::Admin
        } else {
            Role::Member
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "user",
        }
    }
}

/// Full user record as stored in the "users" collection.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// Read-only projection attached to task responses and offered to
/// filter/assignment dropdowns.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
}

/// Admin-only user listing entry (includes the role).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserWithRole {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        UserSummary {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}
