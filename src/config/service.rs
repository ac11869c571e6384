use serde::{Deserialize, Serialize};

/// Connection facts for one logical service, as stored in `services.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: String,
    /// Engine identifier or alias (postgres, mariadb, mongo, ...).
    pub engine: String,
    pub container: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
}

impl ServiceInfo {
    /// User name, or the engine's conventional superuser when unset.
    pub fn user_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.user.is_empty() { default } else { &self.user }
    }

    pub fn database_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.database.is_empty() {
            default
        } else {
            &self.database
        }
    }
}
