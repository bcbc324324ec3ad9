//! `StoreHandle`: the typed, row-mapped API that closures submitted to
//! `StoreManager` receive. Wraps one owned `libsql::Connection` so callers
//! never touch raw SQL outside this crate.

use libsql::{params, Connection, Rows};

use controller_domain::traffic::{CredentialBinding, DnsRecord, InboundTraffic};
use controller_domain::user::User;

use crate::errors::StoreError;

/// Cheap to clone: `libsql::Connection` is a handle onto the shared
/// connection state, not a distinct socket. `StoreManager` hands each job a
/// clone rather than a borrow so closures can be retried by value (§4.1).
#[derive(Clone)]
pub struct StoreHandle {
    conn: Connection,
}

impl StoreHandle {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Raw connection escape hatch for the snapshot module, which issues
    /// `ATTACH DATABASE`/`DETACH DATABASE` statements outside the typed API.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub async fn begin(&self) -> Result<(), StoreError> {
        self.conn.execute("BEGIN IMMEDIATE", ()).await?;
        Ok(())
    }

    pub async fn commit(&self) -> Result<(), StoreError> {
        self.conn.execute("COMMIT", ()).await?;
        Ok(())
    }

    pub async fn rollback(&self) -> Result<(), StoreError> {
        self.conn.execute("ROLLBACK", ()).await?;
        Ok(())
    }

    // ---- users ----------------------------------------------------

    pub async fn user_exists(&self, node: &str, username: &str) -> Result<bool, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM users WHERE node = ?1 AND username = ?2",
                params![node, username],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn insert_new_user(
        &self,
        node: &str,
        username: &str,
        enabled: bool,
        now: &str,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO users (node, username, enabled, created_at, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(node, username) DO NOTHING",
                params![node, username, if enabled { "true" } else { "false" }, now],
            )
            .await?;
        Ok(())
    }

    pub async fn set_enabled(&self, node: &str, username: &str, enabled: bool) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE users SET enabled = ?1 WHERE node = ?2 AND username = ?3",
                params![if enabled { "true" } else { "false" }, node, username],
            )
            .await?;
        Ok(())
    }

    pub async fn delete_user(&self, node: &str, username: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM credential_bindings WHERE node = ?1 AND username = ?2",
                params![node, username],
            )
            .await?;
        self.conn
            .execute(
                "DELETE FROM users WHERE node = ?1 AND username = ?2",
                params![node, username],
            )
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, node: &str, username: &str) -> Result<Option<User>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT node, username, enabled, created_at, sub_end, renew_days, ip_limit,
                        last_seen, uplink, downlink, sess_uplink, sess_downlink, rate, ips
                 FROM users WHERE node = ?1 AND username = ?2",
                params![node, username],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(map_user(row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_users(&self, node: Option<&str>) -> Result<Vec<User>, StoreError> {
        let mut rows = match node {
            Some(node) => {
                self.conn
                    .query(
                        "SELECT node, username, enabled, created_at, sub_end, renew_days, ip_limit,
                                last_seen, uplink, downlink, sess_uplink, sess_downlink, rate, ips
                         FROM users WHERE node = ?1 ORDER BY username",
                        params![node],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(
                        "SELECT node, username, enabled, created_at, sub_end, renew_days, ip_limit,
                                last_seen, uplink, downlink, sess_uplink, sess_downlink, rate, ips
                         FROM users ORDER BY node, username",
                        (),
                    )
                    .await?
            }
        };
        collect(&mut rows, map_user).await
    }

    pub async fn list_usernames_for_node(&self, node: &str) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .conn
            .query("SELECT username FROM users WHERE node = ?1", params![node])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row.get::<String>(0).map_err(|e| StoreError::Mapping(e.to_string()))?);
        }
        Ok(out)
    }

    pub async fn list_users_with_subscription(&self) -> Result<Vec<User>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT node, username, enabled, created_at, sub_end, renew_days, ip_limit,
                        last_seen, uplink, downlink, sess_uplink, sess_downlink, rate, ips
                 FROM users WHERE sub_end != '' ORDER BY sub_end",
                (),
            )
            .await?;
        collect(&mut rows, map_user).await
    }

    pub async fn set_sub_end(&self, node: &str, username: &str, sub_end: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE users SET sub_end = ?1 WHERE node = ?2 AND username = ?3",
                params![sub_end, node, username],
            )
            .await?;
        Ok(())
    }

    pub async fn set_renew_days(&self, node: &str, username: &str, days: i64) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE users SET renew_days = ?1 WHERE node = ?2 AND username = ?3",
                params![days, node, username],
            )
            .await?;
        Ok(())
    }

    pub async fn set_ip_limit(&self, node: &str, username: &str, limit: i64) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE users SET ip_limit = ?1 WHERE node = ?2 AND username = ?3",
                params![limit, node, username],
            )
            .await?;
        Ok(())
    }

    pub async fn set_ips(&self, node: &str, username: &str, ips: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE users SET ips = ?1 WHERE node = ?2 AND username = ?3",
                params![ips, node, username],
            )
            .await?;
        Ok(())
    }

    pub async fn set_last_seen(&self, node: &str, username: &str, last_seen: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE users SET last_seen = ?1 WHERE node = ?2 AND username = ?3",
                params![last_seen, node, username],
            )
            .await?;
        Ok(())
    }

    /// Applies a traffic observation to a user's counters. `delta_up`/`delta_down`
    /// accumulate into the running cumulative totals; `sess_up`/`sess_down` and
    /// `rate` always replace the prior value. A zero delta (the first-frame
    /// initialization case) still creates the row if it is missing.
    pub async fn apply_user_traffic(
        &self,
        node: &str,
        username: &str,
        delta_up: i64,
        delta_down: i64,
        sess_up: i64,
        sess_down: i64,
        rate: i64,
        now: &str,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO users (node, username, created_at, last_seen, uplink, downlink, sess_uplink, sess_downlink, rate)
                 VALUES (?1, ?2, ?7, ?7, ?3, ?4, ?5, ?6, ?8)
                 ON CONFLICT(node, username) DO UPDATE SET
                    uplink = uplink + ?3,
                    downlink = downlink + ?4,
                    sess_uplink = ?5,
                    sess_downlink = ?6,
                    rate = ?8",
                params![node, username, delta_up, delta_down, sess_up, sess_down, now, rate],
            )
            .await?;
        Ok(())
    }

    pub async fn reset_user_traffic(&self, node: Option<&str>) -> Result<(), StoreError> {
        match node {
            Some(node) => {
                self.conn
                    .execute(
                        "UPDATE users SET uplink = 0, downlink = 0, sess_uplink = 0, sess_downlink = 0, rate = 0
                         WHERE node = ?1",
                        params![node],
                    )
                    .await?
            }
            None => {
                self.conn
                    .execute(
                        "UPDATE users SET uplink = 0, downlink = 0, sess_uplink = 0, sess_downlink = 0, rate = 0",
                        (),
                    )
                    .await?
            }
        };
        Ok(())
    }

    // ---- credential bindings --------------------------------------

    pub async fn insert_binding(
        &self,
        node: &str,
        username: &str,
        credential: &str,
        inbound_tag: &str,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO credential_bindings (node, username, credential, inbound_tag)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(node, username, credential, inbound_tag) DO NOTHING",
                params![node, username, credential, inbound_tag],
            )
            .await?;
        Ok(())
    }

    pub async fn bindings_for_node(&self, node: &str) -> Result<Vec<CredentialBinding>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT node, username, credential, inbound_tag FROM credential_bindings WHERE node = ?1",
                params![node],
            )
            .await?;
        collect(&mut rows, map_binding).await
    }

    // ---- inbound traffic --------------------------------------------

    pub async fn apply_inbound_traffic(
        &self,
        node: &str,
        source: &str,
        delta_up: i64,
        delta_down: i64,
        sess_up: i64,
        sess_down: i64,
        rate: i64,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO inbound_traffic (node, source, uplink, downlink, sess_uplink, sess_downlink, rate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(node, source) DO UPDATE SET
                    uplink = uplink + ?3,
                    downlink = downlink + ?4,
                    sess_uplink = ?5,
                    sess_downlink = ?6,
                    rate = ?7",
                params![node, source, delta_up, delta_down, sess_up, sess_down, rate],
            )
            .await?;
        Ok(())
    }

    pub async fn list_inbound_traffic(&self, node: Option<&str>) -> Result<Vec<InboundTraffic>, StoreError> {
        let mut rows = match node {
            Some(node) => {
                self.conn
                    .query(
                        "SELECT node, source, uplink, downlink, sess_uplink, sess_downlink, rate
                         FROM inbound_traffic WHERE node = ?1 ORDER BY source",
                        params![node],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(
                        "SELECT node, source, uplink, downlink, sess_uplink, sess_downlink, rate
                         FROM inbound_traffic ORDER BY node, source",
                        (),
                    )
                    .await?
            }
        };
        collect(&mut rows, map_inbound).await
    }

    pub async fn reset_inbound_traffic(&self, node: Option<&str>) -> Result<(), StoreError> {
        match node {
            Some(node) => {
                self.conn
                    .execute(
                        "UPDATE inbound_traffic SET uplink = 0, downlink = 0, sess_uplink = 0, sess_downlink = 0, rate = 0
                         WHERE node = ?1",
                        params![node],
                    )
                    .await?
            }
            None => {
                self.conn
                    .execute(
                        "UPDATE inbound_traffic SET uplink = 0, downlink = 0, sess_uplink = 0, sess_downlink = 0, rate = 0",
                        (),
                    )
                    .await?
            }
        };
        Ok(())
    }

    pub async fn delete_inbound_not_in(&self, node: &str, keep: &[String]) -> Result<(), StoreError> {
        if keep.is_empty() {
            self.conn
                .execute("DELETE FROM inbound_traffic WHERE node = ?1", params![node])
                .await?;
            return Ok(());
        }
        let placeholders = (1..=keep.len()).map(|i| format!("?{}", i + 1)).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "DELETE FROM inbound_traffic WHERE node = ?1 AND source NOT IN ({placeholders})",
            placeholders = placeholders
        );
        let mut args: Vec<libsql::Value> = vec![node.into()];
        args.extend(keep.iter().map(|s| libsql::Value::from(s.as_str())));
        self.conn.execute(&sql, args).await?;
        Ok(())
    }

    // ---- dns records -------------------------------------------------

    pub async fn increment_dns(
        &self,
        node: &str,
        username: &str,
        domain: &str,
        count: i64,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO dns_records (node, username, domain, count)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(node, username, domain) DO UPDATE SET count = count + ?4",
                params![node, username, domain, count],
            )
            .await?;
        Ok(())
    }

    pub async fn top_dns(&self, node: &str, username: &str, limit: i64) -> Result<Vec<DnsRecord>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT node, username, domain, count FROM dns_records
                 WHERE node = ?1 AND username = ?2 ORDER BY count DESC LIMIT ?3",
                params![node, username, limit],
            )
            .await?;
        collect(&mut rows, map_dns).await
    }

    pub async fn truncate_dns(&self) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM dns_records", ()).await?;
        Ok(())
    }
}

async fn collect<T>(rows: &mut Rows, map: impl Fn(libsql::Row) -> Result<T, StoreError>) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(map(row)?);
    }
    Ok(out)
}

fn map_user(row: libsql::Row) -> Result<User, StoreError> {
    let err = |e: libsql::Error| StoreError::Mapping(e.to_string());
    Ok(User {
        node: row.get::<String>(0).map_err(err)?,
        username: row.get::<String>(1).map_err(err)?,
        enabled: row.get::<String>(2).map_err(err)? == "true",
        created_at: row.get::<String>(3).map_err(err)?,
        sub_end: row.get::<String>(4).map_err(err)?,
        renew_days: row.get::<i64>(5).map_err(err)?,
        ip_limit: row.get::<i64>(6).map_err(err)?,
        last_seen: row.get::<String>(7).map_err(err)?,
        uplink: row.get::<i64>(8).map_err(err)?,
        downlink: row.get::<i64>(9).map_err(err)?,
        sess_uplink: row.get::<i64>(10).map_err(err)?,
        sess_downlink: row.get::<i64>(11).map_err(err)?,
        rate: row.get::<i64>(12).map_err(err)?,
        ips: row.get::<String>(13).map_err(err)?,
    })
}

fn map_binding(row: libsql::Row) -> Result<CredentialBinding, StoreError> {
    let err = |e: libsql::Error| StoreError::Mapping(e.to_string());
    Ok(CredentialBinding {
        node: row.get::<String>(0).map_err(err)?,
        username: row.get::<String>(1).map_err(err)?,
        credential: row.get::<String>(2).map_err(err)?,
        inbound_tag: row.get::<String>(3).map_err(err)?,
    })
}

fn map_inbound(row: libsql::Row) -> Result<InboundTraffic, StoreError> {
    let err = |e: libsql::Error| StoreError::Mapping(e.to_string());
    Ok(InboundTraffic {
        node: row.get::<String>(0).map_err(err)?,
        source: row.get::<String>(1).map_err(err)?,
        uplink: row.get::<i64>(2).map_err(err)?,
        downlink: row.get::<i64>(3).map_err(err)?,
        sess_uplink: row.get::<i64>(4).map_err(err)?,
        sess_downlink: row.get::<i64>(5).map_err(err)?,
        rate: row.get::<i64>(6).map_err(err)?,
    })
}

fn map_dns(row: libsql::Row) -> Result<DnsRecord, StoreError> {
    let err = |e: libsql::Error| StoreError::Mapping(e.to_string());
    Ok(DnsRecord {
        node: row.get::<String>(0).map_err(err)?,
        username: row.get::<String>(1).map_err(err)?,
        domain: row.get::<String>(2).map_err(err)?,
        count: row.get::<i64>(3).map_err(err)?,
    })
}
