//! Connection strategies and the order the bootstrapper tries them in.

use std::fmt;

use serde::Serialize;

use super::conn_string;
use crate::config::db::RuntimeEnv;

/// Tag identifying how the active backend was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StrategyName {
    #[serde(rename = "Pool-SSL-Prefer")]
    PoolSslPrefer,
    #[serde(rename = "Client-SSL-Prefer")]
    ClientSslPrefer,
    #[serde(rename = "Pool-No-SSL")]
    PoolNoSsl,
    #[serde(rename = "Client-No-SSL")]
    ClientNoSsl,
    /// The ORM's own connect path, tried last.
    #[serde(rename = "ORM-Managed")]
    OrmManaged,
}

impl StrategyName {
    pub const ALL: [StrategyName; 5] = [
        StrategyName::PoolSslPrefer,
        StrategyName::ClientSslPrefer,
        StrategyName::PoolNoSsl,
        StrategyName::ClientNoSsl,
        StrategyName::OrmManaged,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            StrategyName::PoolSslPrefer => "Pool-SSL-Prefer",
            StrategyName::ClientSslPrefer => "Client-SSL-Prefer",
            StrategyName::PoolNoSsl => "Pool-No-SSL",
            StrategyName::ClientNoSsl => "Client-No-SSL",
            StrategyName::OrmManaged => "ORM-Managed",
        }
    }

    pub fn shape(&self) -> StrategyShape {
        match self {
            StrategyName::PoolSslPrefer | StrategyName::PoolNoSsl => StrategyShape::Pool,
            StrategyName::ClientSslPrefer | StrategyName::ClientNoSsl => StrategyShape::Client,
            StrategyName::OrmManaged => StrategyShape::Orm,
        }
    }

    pub fn ssl(&self) -> SslPosture {
        match self {
            StrategyName::PoolNoSsl | StrategyName::ClientNoSsl => SslPosture::Disabled,
            StrategyName::PoolSslPrefer
            | StrategyName::ClientSslPrefer
            | StrategyName::OrmManaged => SslPosture::Permissive,
        }
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Call convention of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyShape {
    /// Check out a connection per call and release it afterwards.
    Pool,
    /// One physical connection, serialized between callers.
    Client,
    /// ORM-owned pool, used checkout-style.
    Orm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslPosture {
    /// Keep whatever SSL the connection string asks for, relaxing `require` in production.
    Permissive,
    /// Force `sslmode=disable`.
    Disabled,
}

/// One entry in the bootstrap order: a strategy plus its connection-string transform.
#[derive(Clone, Copy)]
pub struct StrategyDescriptor {
    pub name: StrategyName,
    transform: fn(&str, RuntimeEnv) -> String,
}

impl StrategyDescriptor {
    fn new(name: StrategyName) -> Self {
        let transform: fn(&str, RuntimeEnv) -> String = match name.ssl() {
            SslPosture::Permissive => conn_string::ssl_permissive,
            SslPosture::Disabled => no_ssl_any_env,
        };
        Self { name, transform }
    }

    /// Connection string this strategy hands to the driver. Always normalized.
    pub fn connection_string(&self, raw: &str, env: RuntimeEnv) -> String {
        (self.transform)(&conn_string::normalize(raw), env)
    }
}

impl fmt::Debug for StrategyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyDescriptor")
            .field("name", &self.name)
            .finish()
    }
}

fn no_ssl_any_env(url: &str, _env: RuntimeEnv) -> String {
    conn_string::no_ssl(url)
}

/// Ordered strategies; the no-SSL pair moves to the front when `force_no_ssl` is set.
pub fn strategy_order(force_no_ssl: bool) -> Vec<StrategyDescriptor> {
    let names = if force_no_ssl {
        [
            StrategyName::PoolNoSsl,
            StrategyName::ClientNoSsl,
            StrategyName::PoolSslPrefer,
            StrategyName::ClientSslPrefer,
            StrategyName::OrmManaged,
        ]
    } else {
        StrategyName::ALL
    };
    names.into_iter().map(StrategyDescriptor::new).collect()
}
