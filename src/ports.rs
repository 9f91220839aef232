//! These traits define what the synchronization needs from the outside world.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{DirectoryEntry, Employee, ItSystem, NewItUser};

/// Port for OS2mo reads and writes.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch the employees matching `uuids`. Unknown identifiers are simply
    /// missing from the output.
    async fn employees(&self, uuids: &[Uuid]) -> Result<Vec<Employee>>;

    /// Fetch every IT-system.
    async fn it_systems(&self) -> Result<Vec<ItSystem>>;

    /// List every employee identifier.
    async fn employee_uuids(&self) -> Result<Vec<Uuid>>;

    /// Create an IT user and return its identifier.
    async fn create_ituser(&self, ituser: &NewItUser) -> Result<Uuid>;
}

/// Port for read-only directory searches.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Search the subtree under `base` with an RFC 4515 `filter`, fetching
    /// only `attributes`.
    async fn search(
        &self,
        base: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>>;
}

/// Port for getting the current date.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// System clock using the local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

#[cfg(test)]
pub struct FixedClock {
    date: NaiveDate,
}

#[cfg(test)]
impl FixedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self { date }
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.date
    }
}
