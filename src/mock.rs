//! In-memory ports for tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{DirectoryEntry, Employee, ItSystem, ItUser, NewItUser};
use crate::ports::{Directory, Registry};
use crate::resolver::OBJECT_GUID;

/// OS2mo stand-in. Created IT users are attached to their employee so a
/// second run observes them.
#[derive(Default)]
pub struct InMemoryRegistry {
    employees: Mutex<Vec<Employee>>,
    it_systems: Mutex<Vec<ItSystem>>,
    employee_queries: Mutex<Vec<Vec<Uuid>>>,
    created: Mutex<Vec<NewItUser>>,
    rejected: Mutex<HashSet<Uuid>>,
    fail_queries: AtomicBool,
}

impl InMemoryRegistry {
    pub fn add_employee(&self, cpr_no: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        self.employees.lock().unwrap().push(Employee {
            uuid,
            cpr_no: cpr_no.into(),
            user_key: format!("user-{cpr_no}"),
            itusers: vec![],
        });
        uuid
    }

    /// Add an employee already holding an IT user in `itsystem`.
    pub fn add_linked_employee(&self, cpr_no: &str, itsystem: Uuid) -> Uuid {
        let uuid = self.add_employee(cpr_no);
        self.attach(uuid, itsystem, Uuid::new_v4().to_string());
        uuid
    }

    pub fn add_it_system(&self, user_key: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        self.it_systems.lock().unwrap().push(ItSystem {
            uuid,
            user_key: user_key.into(),
        });
        uuid
    }

    /// Make `create_ituser` fail for `person`.
    pub fn reject_creation_for(&self, person: Uuid) {
        self.rejected.lock().unwrap().insert(person);
    }

    /// Make every read fail as if OS2mo were unreachable.
    pub fn fail_queries(&self) {
        self.fail_queries.store(true, Ordering::SeqCst);
    }

    pub fn employee_queries(&self) -> Vec<Vec<Uuid>> {
        self.employee_queries.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<NewItUser> {
        self.created.lock().unwrap().clone()
    }

    fn attach(&self, person: Uuid, itsystem: Uuid, user_key: String) -> Uuid {
        let uuid = Uuid::new_v4();
        if let Some(employee) = self
            .employees
            .lock()
            .unwrap()
            .iter_mut()
            .find(|employee| employee.uuid == person)
        {
            employee.itusers.push(ItUser {
                itsystem_uuid: itsystem,
                uuid,
                user_key,
            });
        }
        uuid
    }

    fn check(&self) -> Result<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::GraphQl("OS2mo unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn employees(&self, uuids: &[Uuid]) -> Result<Vec<Employee>> {
        self.employee_queries.lock().unwrap().push(uuids.to_vec());
        self.check()?;

        Ok(self
            .employees
            .lock()
            .unwrap()
            .iter()
            .filter(|employee| uuids.contains(&employee.uuid))
            .cloned()
            .collect())
    }

    async fn it_systems(&self) -> Result<Vec<ItSystem>> {
        self.check()?;
        Ok(self.it_systems.lock().unwrap().clone())
    }

    async fn employee_uuids(&self) -> Result<Vec<Uuid>> {
        self.check()?;
        Ok(self
            .employees
            .lock()
            .unwrap()
            .iter()
            .map(|employee| employee.uuid)
            .collect())
    }

    async fn create_ituser(&self, ituser: &NewItUser) -> Result<Uuid> {
        if self.rejected.lock().unwrap().contains(&ituser.person) {
            return Err(Error::GraphQl("ITUser rejected".into()));
        }

        self.created.lock().unwrap().push(ituser.clone());
        Ok(self.attach(ituser.person, ituser.itsystem, ituser.user_key.clone()))
    }
}

/// Active Directory stand-in answering equality clauses found in the
/// filter. GUIDs are served brace-wrapped, the way AD renders them as text.
pub struct InMemoryDirectory {
    cpr_attribute: String,
    entries: Mutex<Vec<(String, Uuid)>>,
    searches: Mutex<Vec<(String, String, Vec<String>)>>,
}

impl InMemoryDirectory {
    pub fn new(cpr_attribute: &str) -> Self {
        Self {
            cpr_attribute: cpr_attribute.into(),
            entries: Mutex::new(vec![]),
            searches: Mutex::new(vec![]),
        }
    }

    pub fn insert(&self, cpr: &str, guid: Uuid) {
        self.entries.lock().unwrap().push((cpr.into(), guid));
    }

    /// Every `(base, filter, attributes)` searched so far.
    pub fn searches(&self) -> Vec<(String, String, Vec<String>)> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn search(
        &self,
        base: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>> {
        self.searches.lock().unwrap().push((
            base.into(),
            filter.into(),
            attributes.iter().map(|a| a.to_string()).collect(),
        ));

        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(cpr, _)| {
                filter.contains(&format!("({}={cpr})", self.cpr_attribute))
            })
            .map(|(cpr, guid)| {
                let mut entry = DirectoryEntry {
                    dn: format!("CN={cpr},OU=Users,DC=Kommune,DC=net"),
                    ..Default::default()
                };
                entry
                    .attrs
                    .insert(self.cpr_attribute.clone(), vec![cpr.clone()]);
                entry
                    .attrs
                    .insert(OBJECT_GUID.into(), vec![format!("{{{guid}}}")]);
                entry
            })
            .collect())
    }
}
