//! Registry and directory records handled during a synchronization.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OS2mo IT user, the link between an employee and an IT-system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItUser {
    pub itsystem_uuid: Uuid,
    pub uuid: Uuid,
    pub user_key: String,
}

/// Projection of an OS2mo employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub uuid: Uuid,
    pub cpr_no: String,
    pub user_key: String,
    #[serde(default)]
    pub itusers: Vec<ItUser>,
}

impl Employee {
    /// Find the IT user bound to `itsystem`, if any.
    pub fn ituser_for(&self, itsystem: Uuid) -> Option<&ItUser> {
        self.itusers
            .iter()
            .find(|ituser| ituser.itsystem_uuid == itsystem)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItSystem {
    pub uuid: Uuid,
    pub user_key: String,
}

/// IT user about to be created in OS2mo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItUser {
    pub user_key: String,
    pub itsystem: Uuid,
    pub person: Uuid,
    pub from: NaiveDate,
}

impl NewItUser {
    /// Link `person` to `itsystem` using the directory GUID as user key.
    pub fn adguid(
        adguid: Uuid,
        itsystem: Uuid,
        person: Uuid,
        from: NaiveDate,
    ) -> Self {
        Self {
            user_key: adguid.to_string(),
            itsystem,
            person,
            from,
        }
    }
}

/// Single entry returned by a directory search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: std::collections::HashMap<String, Vec<String>>,
    pub bin_attrs: std::collections::HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    /// Raw bytes of the first value of `name`, text or binary.
    pub fn first(&self, name: &str) -> Option<&[u8]> {
        let text = self
            .attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(|value| value.as_bytes());

        text.or_else(|| {
            self.bin_attrs
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .and_then(|(_, values)| values.first())
                .map(Vec::as_slice)
        })
    }
}
