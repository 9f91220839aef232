//! OS2mo GraphQL client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config;
use crate::error::{Error, Result};
use crate::model::{Employee, ItSystem, NewItUser};
use crate::ports::Registry;

const EMPLOYEES_QUERY: &str = r#"
query Employees($uuids: [UUID!]) {
  employees(uuids: $uuids) {
    objects {
      uuid
      cpr_no
      user_key
      itusers {
        itsystem_uuid
        uuid
        user_key
      }
    }
  }
}"#;

const ITSYSTEMS_QUERY: &str = "query ITSystems { itsystems { uuid user_key } }";

const EMPLOYEE_UUIDS_QUERY: &str = "query EmployeeUUIDs { employees { uuid } }";

const CREATE_ITUSER_MUTATION: &str = r#"
mutation CreateITUser($input: ITUserCreateInput!) {
  ituser_create(input: $input) {
    uuid
  }
}"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Objects<T> {
    objects: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct EmployeesData {
    employees: Vec<Objects<Employee>>,
}

#[derive(Debug, Deserialize)]
struct ItSystemsData {
    itsystems: Vec<ItSystem>,
}

#[derive(Debug, Deserialize)]
struct Identified {
    uuid: Uuid,
}

#[derive(Debug, Deserialize)]
struct EmployeeUuidsData {
    employees: Vec<Identified>,
}

#[derive(Debug, Deserialize)]
struct CreateItUserData {
    ituser_create: Identified,
}

/// [`Registry`] backed by the OS2mo GraphQL API.
#[derive(Debug, Clone)]
pub struct GraphQlRegistry {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl GraphQlRegistry {
    /// Create a new [`GraphQlRegistry`].
    pub fn new(config: &config::Registry) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.graphql_url(),
            token: config.token.clone(),
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response: GraphQlResponse<T> =
            request.send().await?.error_for_status()?.json().await?;

        if !response.errors.is_empty() {
            let messages = response
                .errors
                .into_iter()
                .map(|err| err.message)
                .collect::<Vec<_>>();
            return Err(Error::GraphQl(messages.join("; ")));
        }

        response
            .data
            .ok_or_else(|| Error::GraphQl("response has no data".into()))
    }
}

#[async_trait]
impl Registry for GraphQlRegistry {
    async fn employees(&self, uuids: &[Uuid]) -> Result<Vec<Employee>> {
        let data: EmployeesData = self
            .execute(EMPLOYEES_QUERY, json!({ "uuids": uuids }))
            .await?;

        // Only the current validity is requested, so the first object is it.
        Ok(data
            .employees
            .into_iter()
            .filter_map(|employee| employee.objects.into_iter().next())
            .collect())
    }

    async fn it_systems(&self) -> Result<Vec<ItSystem>> {
        let data: ItSystemsData = self.execute(ITSYSTEMS_QUERY, json!({})).await?;
        Ok(data.itsystems)
    }

    async fn employee_uuids(&self) -> Result<Vec<Uuid>> {
        let data: EmployeeUuidsData =
            self.execute(EMPLOYEE_UUIDS_QUERY, json!({})).await?;
        Ok(data.employees.into_iter().map(|e| e.uuid).collect())
    }

    async fn create_ituser(&self, ituser: &NewItUser) -> Result<Uuid> {
        let input = json!({
            "user_key": ituser.user_key,
            "itsystem": ituser.itsystem,
            "person": ituser.person,
            "validity": { "from": ituser.from.format("%Y-%m-%d").to_string() },
        });

        let data: CreateItUserData = self
            .execute(CREATE_ITUSER_MUTATION, json!({ "input": input }))
            .await?;
        Ok(data.ituser_create.uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use httpmock::prelude::*;

    fn registry(server: &MockServer, token: Option<&str>) -> GraphQlRegistry {
        GraphQlRegistry::new(&config::Registry {
            url: server.base_url(),
            token: token.map(str::to_owned),
            graphql_version: 3,
            timeout: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_employees() {
        let server = MockServer::start();
        let uuid = Uuid::new_v4();
        let itsystem = Uuid::new_v4();

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql/v3")
                .header("authorization", "Bearer secret")
                .body_contains("employees(uuids: $uuids)")
                .body_contains(uuid.to_string());
            then.status(200).json_body(json!({
                "data": {
                    "employees": [{
                        "objects": [{
                            "uuid": uuid,
                            "cpr_no": "0101709999",
                            "user_key": "john",
                            "itusers": [{
                                "itsystem_uuid": itsystem,
                                "uuid": Uuid::new_v4(),
                                "user_key": "ccc5f858-5044-4093-a4c2-b2ecb595201e",
                            }],
                        }],
                    }],
                },
            }));
        });

        let employees = registry(&server, Some("secret"))
            .employees(&[uuid])
            .await
            .unwrap();

        mock.assert();
        assert_eq!(employees.len(), 1);
        assert_eq!(employees[0].uuid, uuid);
        assert_eq!(employees[0].cpr_no, "0101709999");
        assert!(employees[0].ituser_for(itsystem).is_some());
    }

    #[tokio::test]
    async fn test_it_systems() {
        let server = MockServer::start();
        let uuid = Uuid::new_v4();

        server.mock(|when, then| {
            when.method(POST).path("/graphql/v3").body_contains("itsystems");
            then.status(200).json_body(json!({
                "data": {
                    "itsystems": [{ "uuid": uuid, "user_key": "Active Directory" }],
                },
            }));
        });

        let systems = registry(&server, None).it_systems().await.unwrap();
        assert_eq!(
            systems,
            vec![ItSystem {
                uuid,
                user_key: "Active Directory".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_employee_uuids() {
        let server = MockServer::start();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        server.mock(|when, then| {
            when.method(POST).path("/graphql/v3").body_contains("EmployeeUUIDs");
            then.status(200).json_body(json!({
                "data": { "employees": [{ "uuid": a }, { "uuid": b }] },
            }));
        });

        let uuids = registry(&server, None).employee_uuids().await.unwrap();
        assert_eq!(uuids, vec![a, b]);
    }

    #[tokio::test]
    async fn test_create_ituser() {
        let server = MockServer::start();
        let created = Uuid::new_v4();
        let ituser = NewItUser {
            user_key: "ccc5f858-5044-4093-a4c2-b2ecb595201e".into(),
            itsystem: Uuid::new_v4(),
            person: Uuid::new_v4(),
            from: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
        };

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql/v3")
                .body_contains("ituser_create")
                .body_contains("ccc5f858-5044-4093-a4c2-b2ecb595201e")
                .body_contains("2026-10-18");
            then.status(200).json_body(json!({
                "data": { "ituser_create": { "uuid": created } },
            }));
        });

        let uuid = registry(&server, None).create_ituser(&ituser).await.unwrap();

        mock.assert();
        assert_eq!(uuid, created);
    }

    #[tokio::test]
    async fn test_graphql_errors() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(POST).path("/graphql/v3");
            then.status(200).json_body(json!({
                "data": null,
                "errors": [{ "message": "ITSystem not found" }],
            }));
        });

        match registry(&server, None).it_systems().await {
            Err(Error::GraphQl(message)) => {
                assert_eq!(message, "ITSystem not found")
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_error() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(POST).path("/graphql/v3");
            then.status(503);
        });

        assert!(matches!(
            registry(&server, None).employee_uuids().await,
            Err(Error::Http(_))
        ));
    }
}
