//! Active Directory support.

use async_trait::async_trait;
use ldap3::{
    Ldap as Ldap3, LdapConnAsync, LdapConnSettings, LdapError, Scope,
    SearchEntry,
};
use rand::seq::SliceRandom;

use crate::config;
use crate::error::Result;
use crate::model::DirectoryEntry;
use crate::ports::Directory;

/// Read-only connection to one of the configured domain controllers.
#[derive(Clone)]
pub struct Ldap {
    conn: Ldap3,
    url: String,
}

impl Ldap {
    /// Connect and bind to the first reachable controller, trying them in
    /// random order.
    pub async fn connect(config: &config::Ldap) -> Result<Self> {
        let mut controllers = config.controllers.clone();
        controllers.shuffle(&mut rand::thread_rng());

        let mut last_error = LdapError::EndOfStream;
        for controller in &controllers {
            let url = controller.url();
            match Self::bind(controller, &config.bind_dn(), &config.password)
                .await
            {
                Ok(conn) => {
                    tracing::info!(%url, "connected to domain controller");
                    return Ok(Self { conn, url });
                },
                Err(err) => {
                    tracing::warn!(%url, error = %err, "domain controller unavailable");
                    last_error = err;
                },
            }
        }

        Err(last_error.into())
    }

    async fn bind(
        controller: &config::Controller,
        bind_dn: &str,
        password: &str,
    ) -> std::result::Result<Ldap3, LdapError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(controller.timeout())
            .set_no_tls_verify(controller.insecure);

        let (handle, mut conn) =
            LdapConnAsync::with_settings(settings, &controller.url()).await?;
        ldap3::drive!(handle);

        conn.simple_bind(bind_dn, password).await?.success()?;
        Ok(conn)
    }

    /// URL of the controller in use.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Directory for Ldap {
    async fn search(
        &self,
        base: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<DirectoryEntry>> {
        let mut conn = self.conn.clone();
        let (results, _) = conn
            .search(base, Scope::Subtree, filter, attributes.to_vec())
            .await?
            .success()?;

        tracing::debug!(
            url = %self.url,
            entries = results.len(),
            "directory search done"
        );

        Ok(results
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attrs: entry.attrs,
                bin_attrs: entry.bin_attrs,
            })
            .collect())
    }
}

/// Escape a value for use inside an RFC 4515 filter.
pub fn escape_ldap(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}
