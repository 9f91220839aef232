//! Batch loaders resolving employees, IT-systems and AD GUIDs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ldap::escape_ldap;
use crate::loader::{BatchFn, BatchPolicy, Loader};
use crate::model::{DirectoryEntry, Employee};
use crate::ports::{Directory, Registry};

/// AD attribute holding the object identifier.
pub const OBJECT_GUID: &str = "objectGUID";

pub type EmployeeLoader = Loader<Uuid, Employee, EmployeeFetcher>;
pub type ItSystemLoader = Loader<String, Uuid, ItSystemFetcher>;
pub type AdGuidLoader = Loader<String, Uuid, AdGuidFetcher>;

/// Fetch employees by identifier in one query.
pub struct EmployeeFetcher {
    registry: Arc<dyn Registry>,
}

#[async_trait]
impl BatchFn<Uuid, Employee> for EmployeeFetcher {
    async fn load(&self, keys: &[Uuid]) -> Result<Vec<Option<Employee>>> {
        let mut uuids = keys.to_vec();
        uuids.sort_unstable();
        uuids.dedup();

        let employees = self
            .registry
            .employees(&uuids)
            .await?
            .into_iter()
            .map(|employee| (employee.uuid, employee))
            .collect::<HashMap<_, _>>();

        Ok(keys.iter().map(|key| employees.get(key).cloned()).collect())
    }
}

/// Fetch every IT-system and pick the requested ones by user key.
pub struct ItSystemFetcher {
    registry: Arc<dyn Registry>,
}

#[async_trait]
impl BatchFn<String, Uuid> for ItSystemFetcher {
    async fn load(&self, keys: &[String]) -> Result<Vec<Option<Uuid>>> {
        let systems = self
            .registry
            .it_systems()
            .await?
            .into_iter()
            .map(|system| (system.user_key, system.uuid))
            .collect::<HashMap<_, _>>();

        Ok(keys.iter().map(|key| systems.get(key).copied()).collect())
    }
}

/// Search AD for many CPR numbers at once.
pub struct AdGuidFetcher {
    directory: Arc<dyn Directory>,
    cpr_attribute: String,
    search_base: String,
}

impl AdGuidFetcher {
    /// `(&(objectclass=user)(|(attr=cpr1)(attr=cpr2)...))`
    pub fn filter(&self, cprs: &[String]) -> String {
        let conditions = cprs
            .iter()
            .map(|cpr| format!("({}={})", self.cpr_attribute, escape_ldap(cpr)))
            .collect::<String>();
        format!("(&(objectclass=user)(|{conditions}))")
    }
}

#[async_trait]
impl BatchFn<String, Uuid> for AdGuidFetcher {
    async fn load(&self, keys: &[String]) -> Result<Vec<Option<Uuid>>> {
        let entries = self
            .directory
            .search(
                &self.search_base,
                &self.filter(keys),
                &[self.cpr_attribute.as_str(), OBJECT_GUID],
            )
            .await?;

        let guids = cpr_guid_map(&entries, &self.cpr_attribute);
        Ok(keys.iter().map(|key| guids.get(key).copied()).collect())
    }
}

/// Convert directory entries into a CPR to GUID map.
///
/// Entries missing either attribute, or carrying an unreadable GUID, are
/// skipped.
pub fn cpr_guid_map(
    entries: &[DirectoryEntry],
    cpr_attribute: &str,
) -> HashMap<String, Uuid> {
    let mut guids = HashMap::with_capacity(entries.len());
    for entry in entries {
        let cpr = entry
            .first(cpr_attribute)
            .and_then(|raw| std::str::from_utf8(raw).ok());
        let guid = entry.first(OBJECT_GUID).map(parse_object_guid);

        match (cpr, guid) {
            (Some(cpr), Some(Ok(guid))) => {
                guids.insert(cpr.to_owned(), guid);
            },
            (_, Some(Err(err))) => {
                tracing::warn!(dn = %entry.dn, error = %err, "skipping directory entry");
            },
            _ => {
                tracing::warn!(dn = %entry.dn, "directory entry lacks CPR or objectGUID");
            },
        }
    }
    guids
}

/// Parse an AD `objectGUID` value.
///
/// Sixteen raw bytes use the Microsoft GUID layout (first three fields
/// little-endian). Anything else is read as text, optionally wrapped in
/// braces: `{d34513c5-2649-4045-b0a3-038da5d3765b}`.
pub fn parse_object_guid(raw: &[u8]) -> Result<Uuid> {
    if let Ok(bytes) = <[u8; 16]>::try_from(raw) {
        return Ok(Uuid::from_bytes_le(bytes));
    }

    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::InvalidGuid(format!("{raw:02x?}")))?;
    let trimmed = text.trim().trim_start_matches('{').trim_end_matches('}');
    Uuid::parse_str(trimmed).map_err(|_| Error::InvalidGuid(text.to_owned()))
}

/// Every loader a synchronization needs, sharing one batch policy.
#[derive(Clone)]
pub struct Resolvers {
    pub employees: EmployeeLoader,
    pub it_systems: ItSystemLoader,
    pub adguids: AdGuidLoader,
}

impl Resolvers {
    pub fn new(
        registry: Arc<dyn Registry>,
        directory: Arc<dyn Directory>,
        cpr_attribute: impl Into<String>,
        search_base: impl Into<String>,
        policy: BatchPolicy,
    ) -> Self {
        Self {
            employees: Loader::new(
                "employees",
                EmployeeFetcher {
                    registry: Arc::clone(&registry),
                },
                policy,
            ),
            it_systems: Loader::new(
                "itsystems",
                ItSystemFetcher { registry },
                policy,
            ),
            adguids: Loader::new(
                "adguids",
                AdGuidFetcher {
                    directory,
                    cpr_attribute: cpr_attribute.into(),
                    search_base: search_base.into(),
                },
                policy,
            ),
        }
    }
}
