use std::iter::Peekable;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{
    ranges::PortSequencer,
    store::{Keyspace, Store, StoreError},
};

#[derive(Error, Debug)]
pub enum AllocatorError {
    #[error("no free ports left in any allowed range")]
    PoolExhausted,
    #[error("store access failed: {0}")]
    Store(#[from] StoreError),
    #[error("malformed record for key '{key}': {source}")]
    Record {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("user name must not be empty")]
    EmptyUser,
    #[error("port allocation service is not running")]
    Unavailable,
}

/// The port a user holds, stored under the user's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub port: u16,
    pub created_at: DateTime<Utc>,
}

/// The user holding a port, stored under the port number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRecord {
    pub user: String,
    pub created_at: DateTime<Utc>,
}

/// Hands out one port per user from the allowed ranges.
///
/// Each new user consumes candidates from a single-pass sequencer, so ports
/// skipped because another user holds them are never revisited. A candidate
/// is only consumed once it is known to be taken or has been claimed, so a
/// failed store call leaves it available for the next request.
pub struct PortAllocator<S> {
    store: S,
    sequencer: Peekable<PortSequencer>,
}

impl<S: Store> PortAllocator<S> {
    pub fn new(store: S, sequencer: PortSequencer) -> Self {
        PortAllocator {
            store,
            sequencer: sequencer.peekable(),
        }
    }

    /// Return the user's port, claiming the next free one on first request.
    pub fn allocate(&mut self, user: &str) -> Result<u16, AllocatorError> {
        if user.trim().is_empty() {
            return Err(AllocatorError::EmptyUser);
        }

        if let Some(record) = self.user_record(user)? {
            info!("Found previously allocated port {} for '{}'", record.port, user);
            return Ok(record.port);
        }

        debug!("No record for '{}', looking for a free port", user);
        let port = self.next_free_port()?;
        self.claim(user, port)?;
        self.sequencer.next();
        info!("Allocated port {} to '{}'", port, user);
        Ok(port)
    }

    /// The user's port, if one has been allocated.
    pub fn lookup(&self, user: &str) -> Result<Option<u16>, AllocatorError> {
        if user.trim().is_empty() {
            return Err(AllocatorError::EmptyUser);
        }
        Ok(self.user_record(user)?.map(|r| r.port))
    }

    /// The user holding `port`, if any.
    pub fn owner(&self, port: u16) -> Result<Option<String>, AllocatorError> {
        Ok(self.port_record(port)?.map(|r| r.user))
    }

    /// Advance past taken ports and return the first free one without
    /// consuming it.
    fn next_free_port(&mut self) -> Result<u16, AllocatorError> {
        while let Some(&port) = self.sequencer.peek() {
            debug!("Trying port {}", port);
            match self.port_record(port)? {
                Some(record) => {
                    debug!("Port {} is held by '{}'", port, record.user);
                    self.sequencer.next();
                }
                None => return Ok(port),
            }
        }
        warn!("All allowed ports have been allocated");
        Err(AllocatorError::PoolExhausted)
    }

    fn claim(&self, user: &str, port: u16) -> Result<(), AllocatorError> {
        let created_at = Utc::now();
        let port_key = port.to_string();
        let user_value = encode(
            user,
            &UserRecord {
                port,
                created_at,
            },
        )?;
        let port_value = encode(
            &port_key,
            &PortRecord {
                user: user.to_string(),
                created_at,
            },
        )?;

        self.store.set_all(&[
            (Keyspace::Users, user, user_value.as_str()),
            (Keyspace::Ports, port_key.as_str(), port_value.as_str()),
        ])?;
        Ok(())
    }

    fn user_record(&self, user: &str) -> Result<Option<UserRecord>, AllocatorError> {
        self.read(Keyspace::Users, user)
    }

    fn port_record(&self, port: u16) -> Result<Option<PortRecord>, AllocatorError> {
        self.read(Keyspace::Ports, &port.to_string())
    }

    fn read<T: DeserializeOwned>(
        &self,
        space: Keyspace,
        key: &str,
    ) -> Result<Option<T>, AllocatorError> {
        self.store
            .get(space, key)?
            .map(|value| {
                serde_json::from_str(&value).map_err(|source| AllocatorError::Record {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }
}

/// Records hold only integers, strings and timestamps, so this cannot fail
/// in practice; the error path keeps the claim free of panics.
fn encode<T: Serialize>(key: &str, record: &T) -> Result<String, AllocatorError> {
    serde_json::to_string(record).map_err(|source| AllocatorError::Record {
        key: key.to_string(),
        source,
    })
}
