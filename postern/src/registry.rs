//! Memoisation of constructed components by name.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::sync::OnceCell;

/// One name's cell, plus how many requests are currently inside
/// [`Registry::get_or_try_init`] for it. `pending` only changes under the
/// map lock.
struct Slot<T: ?Sized> {
    cell: OnceCell<Arc<T>>,
    pending: AtomicUsize,
}

impl<T: ?Sized> Default for Slot<T> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
            pending: AtomicUsize::new(0),
        }
    }
}

/// Name → instance map guaranteeing at most one construction per name.
///
/// The map lock is only held to find or insert a name's slot; construction
/// itself happens inside that slot's [`OnceCell`], so concurrent requests for
/// one name wait for a single constructor while other names proceed. A failed
/// construction leaves no entry behind once no other request is waiting on
/// it.
pub struct Registry<T: ?Sized> {
    slots: Mutex<HashMap<String, Arc<Slot<T>>>>,
    constructions: AtomicUsize,
}

impl<T: ?Sized> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .field("constructions", &self.constructions())
            .finish()
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            constructions: AtomicUsize::new(0),
        }
    }
}

/// A request's claim on a slot. Dropping it, on any exit path, removes a
/// still-empty slot that nobody else is waiting on.
struct Claim<'a, T: ?Sized> {
    registry: &'a Registry<T>,
    name: &'a str,
    slot: Arc<Slot<T>>,
}

impl<T: ?Sized> Drop for Claim<'_, T> {
    fn drop(&mut self) {
        let mut slots = self
            .registry
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let remaining = self.slot.pending.fetch_sub(1, Ordering::Relaxed) - 1;
        if remaining == 0
            && !self.slot.cell.initialized()
            && slots
                .get(self.name)
                .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
        {
            slots.remove(self.name);
        }
    }
}

impl<T: ?Sized> Registry<T> {
    fn claim<'a>(&'a self, name: &'a str) -> Claim<'a, T> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = Arc::clone(slots.entry(name.to_string()).or_default());
        slot.pending.fetch_add(1, Ordering::Relaxed);
        Claim {
            registry: self,
            name,
            slot,
        }
    }

    /// The instance registered as `name`, constructing it with `init` if
    /// this is the first request.
    ///
    /// # Errors
    /// Whatever `init` fails with; the name stays unregistered.
    pub async fn get_or_try_init<F, Fut, E>(&self, name: &str, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, E>>,
    {
        let claim = self.claim(name);
        claim
            .slot
            .cell
            .get_or_try_init(|| async {
                let instance = init().await?;
                self.constructions.fetch_add(1, Ordering::Relaxed);
                Ok(instance)
            })
            .await
            .map(Arc::clone)
    }

    /// The instance registered as `name`, if it has been constructed.
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(name).and_then(|slot| slot.cell.get().cloned())
    }

    /// Number of constructed instances.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|slot| slot.cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times a constructor has succeeded. Never exceeds [`len`].
    ///
    /// [`len`]: Self::len
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::Relaxed)
    }

    /// Names of constructed instances, sorted.
    pub fn names(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = slots
            .iter()
            .filter(|(_, slot)| slot.cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every constructed instance, in name order.
    pub fn instances(&self) -> Vec<Arc<T>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut instances: Vec<_> = slots
            .iter()
            .filter_map(|(name, slot)| {
                slot.cell
                    .get()
                    .map(|instance| (name.clone(), Arc::clone(instance)))
            })
            .collect();
        instances.sort_by(|(a, _), (b, _)| a.cmp(b));
        instances.into_iter().map(|(_, instance)| instance).collect()
    }
}
