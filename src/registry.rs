//! Connection registry.
//!
//! Maps client ids to live connections under a single read/write lock.
//! Admission is two-phase: a slot is reserved while the upgrade handshake is
//! still in flight and installed once the connection exists, so pending
//! upgrades count against capacity and the registry can never overflow.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::connection::{ClientId, Connection};
use super::error::PoolError;

#[derive(Debug, Default)]
struct Slots {
    live: HashMap<ClientId, Arc<Connection>>,
    reserved: HashSet<ClientId>,
    closed: bool,
}

impl Slots {
    fn occupied(&self) -> usize {
        self.live.len() + self.reserved.len()
    }
}

/// Bounded table of live connections.
#[derive(Debug)]
pub struct Registry {
    capacity: usize,
    slots: RwLock<Slots>,
}

impl Registry {
    /// Creates an empty registry with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: RwLock::new(Slots::default()),
        }
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().live.len()
    }

    /// Returns true if no connection is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().live.is_empty()
    }

    /// Returns the number of reservations waiting for their upgrade.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.slots.read().reserved.len()
    }

    /// Returns true if the id is live.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.slots.read().live.contains_key(id)
    }

    /// Reserves a slot for an upcoming connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] after [`Registry::drain`],
    /// [`PoolError::AlreadyRegistered`] if the id is live or reserved, and
    /// [`PoolError::PoolFull`] if every slot is taken.
    pub fn reserve(&self, id: &ClientId) -> Result<(), PoolError> {
        let mut slots = self.slots.write();

        if slots.closed {
            return Err(PoolError::Closed);
        }
        if slots.live.contains_key(id) || slots.reserved.contains(id) {
            return Err(PoolError::AlreadyRegistered(id.clone()));
        }
        if slots.occupied() >= self.capacity {
            return Err(PoolError::PoolFull);
        }

        slots.reserved.insert(id.clone());
        Ok(())
    }

    /// Releases a reservation that will never be installed.
    ///
    /// Returns true if a reservation was held.
    pub fn release(&self, id: &ClientId) -> bool {
        self.slots.write().reserved.remove(id)
    }

    /// Turns a reservation into a live entry.
    ///
    /// `on_installed` runs while the table is still locked, so whatever it
    /// starts is ordered before any later [`Registry::drain`].
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the registry was drained in the
    /// meantime; the reservation is dropped either way.
    pub fn install<F>(&self, conn: Arc<Connection>, on_installed: F) -> Result<(), PoolError>
    where
        F: FnOnce(),
    {
        let mut slots = self.slots.write();

        slots.reserved.remove(conn.id());
        if slots.closed {
            return Err(PoolError::Closed);
        }

        slots.live.insert(conn.id().clone(), conn);
        on_installed();
        Ok(())
    }

    /// Returns the live connection for an id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.slots.read().live.get(id).map(Arc::clone)
    }

    /// Removes the live connection for an id.
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        self.slots.write().live.remove(id)
    }

    /// Removes `conn` only if it is still the entry registered under its id.
    ///
    /// A failure observed on an old connection must not evict a newer one
    /// that reused the same id.
    pub fn remove_connection(&self, conn: &Connection) -> bool {
        let mut slots = self.slots.write();
        let is_current = slots
            .live
            .get(conn.id())
            .is_some_and(|current| current.serial() == conn.serial());
        if is_current {
            slots.live.remove(conn.id());
        }
        is_current
    }

    /// Returns a consistent snapshot of every live connection.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.slots.read().live.values().map(Arc::clone).collect()
    }

    /// Removes every entry and refuses all further reservations.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let mut slots = self.slots.write();
        slots.closed = true;
        slots.reserved.clear();
        slots.live.drain().map(|(_, conn)| conn).collect()
    }
}
