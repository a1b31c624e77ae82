use std::{
    collections::HashMap,
    fmt,
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{error::GatewayError, server::ServerHandle};

// ── Session key ──────────────────────────────────────────────────────────────

/// Identifies one pre-run/post-run pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for the single session an orchestrator runs per workspace.
    pub fn for_workspace(root: &Path) -> Self {
        Self(format!("workspace:{}", root.display()))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

enum Slot {
    /// Reserved by a pre-run that has not finished binding.
    Starting,
    Listening(ServerHandle),
}

/// What [`SessionRegistry::take`] found under a key.
pub enum Taken {
    Listening(ServerHandle),
    Starting,
    Absent,
}

/// Live sessions by key. At most one slot per key.
///
/// Each operation is a single critical section; the lock is never held
/// across binding or draining.
#[derive(Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<SessionKey, Slot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<SessionKey, Slot>> {
        // The map stays consistent even if a holder panicked.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `key` for a starting session. The claim is dropped again unless
    /// [`Reservation::commit`] is called.
    pub fn reserve(&self, key: SessionKey) -> Result<Reservation<'_>, GatewayError> {
        let mut slots = self.slots();
        if slots.contains_key(&key) {
            return Err(GatewayError::SessionActive(key.0));
        }
        slots.insert(key.clone(), Slot::Starting);
        Ok(Reservation {
            registry: self,
            key,
            committed: false,
        })
    }

    /// Remove a listening session. A session still starting stays in place.
    pub fn take(&self, key: &SessionKey) -> Taken {
        let mut slots = self.slots();
        match slots.remove(key) {
            Some(Slot::Listening(handle)) => Taken::Listening(handle),
            Some(Slot::Starting) => {
                slots.insert(key.clone(), Slot::Starting);
                Taken::Starting
            },
            None => Taken::Absent,
        }
    }

    pub fn is_listening(&self, key: &SessionKey) -> bool {
        matches!(self.slots().get(key), Some(Slot::Listening(_)))
    }

    /// Number of reserved or listening sessions.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

/// A claimed session key. Dropping it without committing frees the key.
pub struct Reservation<'a> {
    registry: &'a SessionRegistry,
    key: SessionKey,
    committed: bool,
}

impl Reservation<'_> {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Publish the started server under the reserved key.
    pub fn commit(mut self, handle: ServerHandle) {
        self.registry
            .slots()
            .insert(self.key.clone(), Slot::Listening(handle));
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.registry.slots();
        if matches!(slots.get(&self.key), Some(Slot::Starting)) {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn workspace_key_is_stable() {
        let root = PathBuf::from("/work/repo");
        assert_eq!(SessionKey::for_workspace(&root), SessionKey::for_workspace(&root));
        assert_eq!(SessionKey::for_workspace(&root).to_string(), "workspace:/work/repo");
    }

    #[test]
    fn second_reservation_is_refused() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("run-1");
        let _held = registry.reserve(key.clone()).unwrap();
        let err = match registry.reserve(key) {
            Err(e) => e,
            Ok(_) => panic!("duplicate reservation"),
        };
        assert!(matches!(err, GatewayError::SessionActive(ref k) if k == "run-1"));
    }

    #[test]
    fn dropped_reservation_frees_the_key() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("run-1");
        drop(registry.reserve(key.clone()).unwrap());
        assert!(registry.is_empty());
        assert!(registry.reserve(key).is_ok());
    }

    #[test]
    fn take_leaves_starting_sessions_alone() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("run-1");
        let held = registry.reserve(key.clone()).unwrap();
        assert!(matches!(registry.take(&key), Taken::Starting));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_listening(&key));
        drop(held);
        assert!(matches!(registry.take(&key), Taken::Absent));
    }

    #[test]
    fn distinct_keys_are_independent() {
        let registry = SessionRegistry::new();
        let _a = registry.reserve(SessionKey::new("a")).unwrap();
        let _b = registry.reserve(SessionKey::new("b")).unwrap();
        assert_eq!(registry.len(), 2);
    }
}
