//! Handler version selection.
//!
//! Every API module has one handler trait and one table of versions, each
//! version declaring the exact messages (`{name}_{crc}`) it sends and
//! receives. On connect, the table is checked against the peer's message
//! table in order and the first fully compatible version is instantiated.
//! There is no fallback to a partially matching version.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::channel::{ApiChannel, Connection};
use crate::dialect::Dialect;
use crate::error::{BinapiError, BinapiResult};

/// Builds a handler on top of a channel.
pub type Constructor<H> = fn(ApiChannel) -> Arc<H>;

/// One implementation of a module, tied to one dataplane release.
pub struct HandlerVersion<H: ?Sized> {
    pub version: String,
    pub dialect: Dialect,
    /// Messages as `{name}_{crc}`.
    pub messages: Vec<String>,
    pub constructor: Constructor<H>,
}

impl<H: ?Sized> fmt::Debug for HandlerVersion<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerVersion")
            .field("version", &self.version)
            .field("dialect", &self.dialect)
            .field("messages", &self.messages.len())
            .finish()
    }
}

/// The selected version of a module with its handler instance.
pub struct Resolved<H: ?Sized> {
    pub version: String,
    pub dialect: Dialect,
    pub handler: Arc<H>,
}

impl<H: ?Sized> Clone for Resolved<H> {
    fn clone(&self) -> Self {
        Self {
            version: self.version.clone(),
            dialect: self.dialect,
            handler: self.handler.clone(),
        }
    }
}

/// Ordered table of handler versions for one module.
pub struct HandlerRegistry<H: ?Sized> {
    module: String,
    versions: Vec<HandlerVersion<H>>,
}

impl<H: ?Sized> HandlerRegistry<H> {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            versions: Vec::new(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Appends a version speaking `dialect` with the given message names.
    ///
    /// A name the dialect does not define is kept without a CRC; the peer
    /// table never contains such an entry, so the version cannot match.
    pub fn add_version(
        &mut self,
        version: impl Into<String>,
        dialect: Dialect,
        messages: &[&str],
        constructor: Constructor<H>,
    ) -> &mut Self {
        let messages = messages
            .iter()
            .map(|name| dialect.name_crc(name).unwrap_or_else(|| name.to_string()))
            .collect();
        self.push(HandlerVersion {
            version: version.into(),
            dialect,
            messages,
            constructor,
        })
    }

    pub fn push(&mut self, version: HandlerVersion<H>) -> &mut Self {
        self.versions.push(version);
        self
    }

    pub fn versions(&self) -> &[HandlerVersion<H>] {
        &self.versions
    }

    /// Instantiates the first version whose whole message set the peer knows.
    pub fn resolve(&self, conn: &Connection) -> BinapiResult<Resolved<H>> {
        for candidate in &self.versions {
            match conn.check_compatibility(&candidate.messages) {
                Ok(()) => {
                    info!(
                        module = %self.module,
                        version = %candidate.version,
                        "selected handler version"
                    );
                    return Ok(Resolved {
                        version: candidate.version.clone(),
                        dialect: candidate.dialect,
                        handler: (candidate.constructor)(conn.channel(candidate.dialect)),
                    });
                }
                Err(err) => debug!(
                    module = %self.module,
                    version = %candidate.version,
                    error = %err,
                    "handler version incompatible"
                ),
            }
        }
        Err(BinapiError::IncompatibleVersion {
            module: self.module.clone(),
            tried: self.versions.iter().map(|v| v.version.clone()).collect(),
        })
    }
}

/// A module handler resolved at most once per connection.
pub struct ResolvedHandler<H: ?Sized> {
    cell: OnceCell<Resolved<H>>,
}

impl<H: ?Sized> Default for ResolvedHandler<H> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }
}

impl<H: ?Sized> ResolvedHandler<H> {
    /// Resolves on first use; later calls return the same instance. A failed
    /// resolution leaves the cell empty.
    pub fn get_or_resolve(
        &self,
        registry: &HandlerRegistry<H>,
        conn: &Connection,
    ) -> BinapiResult<&Resolved<H>> {
        self.cell.get_or_try_init(|| registry.resolve(conn))
    }

    pub fn get(&self) -> Option<&Resolved<H>> {
        self.cell.get()
    }
}
