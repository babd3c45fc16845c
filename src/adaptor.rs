//! Mapping of storage locations to lock targets
//!
//! The lock manager treats targets as opaque keys. This module provides the
//! default mapping used by the storage engine: containers are locked by id,
//! tuples by their location, and index entries by their key bytes.

use serde::{Deserialize, Serialize};

use crate::common::{LockError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId {
    pub container_id: u32,
    pub page_number: u32,
}

/// Physical location of a tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TupleId {
    pub page_id: PageId,
    pub slot: u16,
}

impl TupleId {
    pub fn new(container_id: u32, page_number: u32, slot: u16) -> Self {
        Self {
            page_id: PageId {
                container_id,
                page_number,
            },
            slot,
        }
    }
}

/// A location inside the storage engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    Tuple(TupleId),
    /// Index key, not tied to a container
    Key(Vec<u8>),
}

/// Lock target produced by an adaptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lockable {
    Container(u32),
    Tuple(TupleId),
    Key(Vec<u8>),
}

/// Converts storage locations into lock targets
pub trait LockAdaptor: Send + Sync {
    fn container_target(&self, container_id: u32) -> Lockable;

    /// Target of the container holding `location`
    fn location_container(&self, location: &Location) -> Result<Lockable>;

    fn location_target(&self, location: &Location) -> Result<Lockable>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLockAdaptor;

impl LockAdaptor for DefaultLockAdaptor {
    fn container_target(&self, container_id: u32) -> Lockable {
        Lockable::Container(container_id)
    }

    fn location_container(&self, location: &Location) -> Result<Lockable> {
        match location {
            Location::Tuple(tuple) => Ok(Lockable::Container(tuple.page_id.container_id)),
            Location::Key(_) => Err(LockError::InvalidTarget {
                message: format!("{location:?} does not belong to a container"),
            }),
        }
    }

    fn location_target(&self, location: &Location) -> Result<Lockable> {
        Ok(match location {
            Location::Tuple(tuple) => Lockable::Tuple(*tuple),
            Location::Key(key) => Lockable::Key(key.clone()),
        })
    }
}
