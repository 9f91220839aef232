//! Ensure every employee has an ADGUID IT user.
//!
//! The existing-link check and the creation are two separate OS2mo calls.
//! Two runs racing on the same employee may both pass the check and both
//! create an IT user; nothing here prevents that.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config;
use crate::error::{Error, Result};
use crate::model::NewItUser;
use crate::ports::{Clock, Registry};
use crate::resolver::Resolvers;

/// IT-system receiving the IT users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItSystemRef {
    Uuid(Uuid),
    UserKey(String),
}

impl From<&config::ItSystem> for ItSystemRef {
    fn from(config: &config::ItSystem) -> Self {
        match config.uuid {
            Some(uuid) => ItSystemRef::Uuid(uuid),
            None => ItSystemRef::UserKey(config.user_key.clone()),
        }
    }
}

/// Successful end of one employee synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AlreadyLinked,
    Created,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::AlreadyLinked => "already_linked",
            Outcome::Created => "created",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Failure,
}

/// Tally of a run over many employees.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Report {
    pub created: usize,
    pub already_linked: usize,
    pub failed: usize,
}

impl Report {
    /// `Ok` only when no employee failed.
    pub fn status(&self) -> Status {
        if self.failed == 0 {
            Status::Ok
        } else {
            Status::Failure
        }
    }

    fn record(&mut self, employee: Uuid, result: &Result<Outcome>) {
        match record(employee, result) {
            Some(Outcome::AlreadyLinked) => self.already_linked += 1,
            Some(Outcome::Created) => self.created += 1,
            None => self.failed += 1,
        }
    }
}

/// Log and count one employee's result.
fn record(employee: Uuid, result: &Result<Outcome>) -> Option<Outcome> {
    match result {
        Ok(outcome) => {
            metrics::counter!("adguid_sync_total", "outcome" => outcome.label())
                .increment(1);
            Some(*outcome)
        },
        Err(err) => {
            metrics::counter!("adguid_sync_total", "outcome" => "failed")
                .increment(1);
            tracing::warn!(%employee, error = %err, "synchronization failed");
            None
        },
    }
}

/// Per-employee synchronization plus fan-out over all employees.
pub struct Synchronizer {
    resolvers: Resolvers,
    registry: Arc<dyn Registry>,
    clock: Arc<dyn Clock>,
    it_system: ItSystemRef,
    concurrency: usize,
}

impl Synchronizer {
    /// Create a new [`Synchronizer`]. `concurrency` bounds how many
    /// employees [`Synchronizer::sync_all`] handles at once.
    pub fn new(
        resolvers: Resolvers,
        registry: Arc<dyn Registry>,
        clock: Arc<dyn Clock>,
        it_system: ItSystemRef,
        concurrency: usize,
    ) -> Self {
        Self {
            resolvers,
            registry,
            clock,
            it_system,
            concurrency: concurrency.max(1),
        }
    }

    /// Resolve the target IT-system.
    ///
    /// A missing IT-system is a configuration error: every employee would
    /// fail the same way.
    pub async fn it_system_uuid(&self) -> Result<Uuid> {
        match &self.it_system {
            ItSystemRef::Uuid(uuid) => Ok(*uuid),
            ItSystemRef::UserKey(user_key) => self
                .resolvers
                .it_systems
                .load(user_key.clone())
                .await?
                .ok_or_else(|| Error::ItSystemNotFound(user_key.clone())),
        }
    }

    /// Make sure `employee` has an ADGUID IT user.
    pub async fn ensure(&self, employee: Uuid) -> Result<Outcome> {
        let itsystem = self.it_system_uuid().await?;
        self.ensure_in(itsystem, employee).await
    }

    async fn ensure_in(&self, itsystem: Uuid, uuid: Uuid) -> Result<Outcome> {
        let employee = self
            .resolvers
            .employees
            .load(uuid)
            .await?
            .ok_or(Error::EmployeeNotFound(uuid))?;

        if let Some(ituser) = employee.ituser_for(itsystem) {
            tracing::debug!(employee = %uuid, ituser = %ituser.uuid, "IT user already exists");
            return Ok(Outcome::AlreadyLinked);
        }

        let adguid = self
            .resolvers
            .adguids
            .load(employee.cpr_no.clone())
            .await?
            .ok_or(Error::NoDirectoryMatch(uuid))?;

        let ituser =
            NewItUser::adguid(adguid, itsystem, uuid, self.clock.today());
        let created = self.registry.create_ituser(&ituser).await?;

        tracing::info!(employee = %uuid, ituser = %created, %adguid, "IT user created");
        Ok(Outcome::Created)
    }

    /// Synchronize one employee.
    ///
    /// Only a failure to resolve the IT-system is returned as an error;
    /// anything going wrong for the employee becomes [`Status::Failure`].
    pub async fn sync_one(&self, employee: Uuid) -> Result<Status> {
        let itsystem = self.it_system_uuid().await?;
        let result = self.ensure_in(itsystem, employee).await;

        Ok(match record(employee, &result) {
            Some(_) => Status::Ok,
            None => Status::Failure,
        })
    }

    /// Synchronize every employee known to OS2mo.
    ///
    /// A failing employee never cancels the others.
    pub async fn sync_all(self: &Arc<Self>) -> Result<Report> {
        let itsystem = self.it_system_uuid().await?;
        let employees = self.registry.employee_uuids().await?;
        tracing::info!(employees = employees.len(), "synchronizing all employees");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for employee in employees {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| Error::Canceled)?;
            let this = Arc::clone(self);

            tasks.spawn(async move {
                let result = this.ensure_in(itsystem, employee).await;
                drop(permit);
                (employee, result)
            });
        }

        let mut report = Report::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((employee, result)) => report.record(employee, &result),
                Err(err) => {
                    tracing::error!(error = %err, "synchronization task aborted");
                    report.failed += 1;
                },
            }
        }

        tracing::info!(
            created = report.created,
            already_linked = report.already_linked,
            failed = report.failed,
            "synchronization finished"
        );
        Ok(report)
    }
}
