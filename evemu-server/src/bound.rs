//! Per-client objects bound to a game entity.
//!
//! A client binds a service to an entity id and gets back a handle; later
//! calls on the handle are routed to the bound object. Handles are owned by
//! the table and released when the owning session disconnects or the entity
//! leaves the world.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use evemu_core::{CallError, ClientId, EntityId, HandleId, IdAllocator, WireValue};
use serde::Serialize;
use tracing::debug;

use crate::service::{CallRequest, ClientContext};

/// Object reachable through a bound handle.
pub trait BoundObject: Send + Sync {
    /// Short description for logs, e.g. `AgentBound(3010819)`.
    fn describe(&self) -> String;

    fn dispatch(&self, call: &CallRequest<'_>) -> Result<WireValue, CallError>;

    fn methods(&self) -> Vec<&str>;

    /// Whether the entity behind this object still exists. Checked before
    /// every call routed through a handle.
    fn is_live(&self) -> bool {
        true
    }
}

/// A service that can create bound objects.
pub trait BindableService: Send + Sync {
    fn create_bound(
        &self,
        entity: EntityId,
        client: &ClientContext,
    ) -> Result<Arc<dyn BoundObject>, CallError>;
}

/// Identity of one binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindKey {
    pub client: ClientId,
    pub entity: EntityId,
    pub service: String,
}

impl BindKey {
    pub fn new(client: ClientId, entity: EntityId, service: impl Into<String>) -> Self {
        Self {
            client,
            entity,
            service: service.into(),
        }
    }
}

pub struct BoundObjectHandle {
    id: HandleId,
    owner: ClientId,
    entity: EntityId,
    service: String,
    object: Arc<dyn BoundObject>,
    released: AtomicBool,
}

impl BoundObjectHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn owner(&self) -> ClientId {
        self.owner
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn object(&self) -> &Arc<dyn BoundObject> {
        &self.object
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns true for the caller that actually performed the release.
    fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    /// Route a call to the bound object. Fails once the handle is released.
    pub fn call(&self, call: &CallRequest<'_>) -> Result<WireValue, CallError> {
        if self.is_released() {
            return Err(CallError::HandleExpired { handle: self.id });
        }
        self.object.dispatch(call)
    }
}

impl fmt::Debug for BoundObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundObjectHandle")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("entity", &self.entity)
            .field("service", &self.service)
            .field("object", &self.object.describe())
            .field("released", &self.is_released())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundStats {
    pub live_handles: usize,
    pub total_bound: u64,
    pub total_released: u64,
}

/// Index of every live binding, keyed both by bind identity and handle id.
#[derive(Debug)]
pub struct BoundObjectTable {
    by_key: DashMap<BindKey, Arc<BoundObjectHandle>>,
    by_id: DashMap<HandleId, Arc<BoundObjectHandle>>,
    ids: IdAllocator,
    total_bound: AtomicU64,
    total_released: AtomicU64,
}

impl BoundObjectTable {
    pub fn new() -> Self {
        Self {
            by_key: DashMap::new(),
            by_id: DashMap::new(),
            ids: IdAllocator::new(),
            total_bound: AtomicU64::new(0),
            total_released: AtomicU64::new(0),
        }
    }

    /// Return the handle bound under `key`, creating it with `create` if
    /// there is none. The key's shard stays locked while `create` runs, so
    /// two racing binds of the same key observe a single handle.
    ///
    /// An existing handle whose object is no longer live is released and
    /// `create` runs in its place, so a bind never hands back a dead handle.
    /// A failing `create` leaves no entry under `key`.
    ///
    /// The boolean is true when a new handle was created.
    pub fn bind_or_get<F>(
        &self,
        key: BindKey,
        create: F,
    ) -> Result<(Arc<BoundObjectHandle>, bool), CallError>
    where
        F: FnOnce() -> Result<Arc<dyn BoundObject>, CallError>,
    {
        match self.by_key.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().object.is_live() {
                    return Ok((Arc::clone(entry.get()), false));
                }

                let stale = Arc::clone(entry.get());
                debug!(
                    target: "evemu::service",
                    "{} is no longer live, rebinding over {}",
                    stale.object.describe(),
                    stale.id
                );
                self.finish_release(&stale);
                self.by_id.remove(&stale.id);

                match create() {
                    Ok(object) => {
                        let handle = self.install(entry.key(), object);
                        entry.insert(Arc::clone(&handle));
                        Ok((handle, true))
                    }
                    Err(err) => {
                        entry.remove();
                        Err(err)
                    }
                }
            }
            Entry::Vacant(entry) => {
                let object = create()?;
                let handle = self.install(entry.key(), object);
                entry.insert(Arc::clone(&handle));
                Ok((handle, true))
            }
        }
    }

    /// Allocate a handle for `object` and index it by id. The caller holds
    /// the `by_key` entry and stores the handle there.
    fn install(&self, key: &BindKey, object: Arc<dyn BoundObject>) -> Arc<BoundObjectHandle> {
        let handle = Arc::new(BoundObjectHandle {
            id: self.ids.next_handle(),
            owner: key.client,
            entity: key.entity,
            service: key.service.clone(),
            object,
            released: AtomicBool::new(false),
        });
        self.by_id.insert(handle.id, Arc::clone(&handle));
        self.total_bound.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "evemu::service",
            "Bound {} as {} for {}",
            handle.object.describe(),
            handle.id,
            handle.owner
        );
        handle
    }

    pub fn lookup(&self, id: HandleId) -> Result<Arc<BoundObjectHandle>, CallError> {
        self.by_id
            .get(&id)
            .map(|entry| Arc::clone(&*entry))
            .ok_or(CallError::HandleExpired { handle: id })
    }

    /// Release a single handle. Returns false if it was already gone.
    pub fn release(&self, id: HandleId) -> bool {
        let Some((_, handle)) = self.by_id.remove(&id) else {
            return false;
        };
        let released = self.finish_release(&handle);
        let key = BindKey::new(handle.owner, handle.entity, handle.service.clone());
        self.by_key
            .remove_if(&key, |_, bound| Arc::ptr_eq(bound, &handle));
        released
    }

    /// Release every handle owned by `client`.
    pub fn release_session(&self, client: ClientId) -> usize {
        self.release_where(|key| key.client == client)
    }

    /// Release every handle bound to `entity`, whoever owns it.
    pub fn release_entity(&self, entity: EntityId) -> usize {
        self.release_where(|key| key.entity == entity)
    }

    fn release_where(&self, matches: impl Fn(&BindKey) -> bool) -> usize {
        let mut count = 0;
        // handles are marked while their shard is locked, before they leave
        // either index
        self.by_key.retain(|key, handle| {
            if !matches(key) {
                return true;
            }
            if self.finish_release(handle) {
                count += 1;
            }
            self.by_id.remove(&handle.id);
            false
        });
        count
    }

    fn finish_release(&self, handle: &BoundObjectHandle) -> bool {
        if handle.mark_released() {
            self.total_released.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: "evemu::service",
                "Released {} ({})",
                handle.id,
                handle.object.describe()
            );
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Number of live handles owned by `client`.
    pub fn session_len(&self, client: ClientId) -> usize {
        self.by_key
            .iter()
            .filter(|entry| entry.key().client == client)
            .count()
    }

    pub fn stats(&self) -> BoundStats {
        BoundStats {
            live_handles: self.by_key.len(),
            total_bound: self.total_bound.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
        }
    }
}

impl Default for BoundObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evemu_core::{CharacterId, ErrorCode};

    struct Echo(EntityId);

    impl BoundObject for Echo {
        fn describe(&self) -> String {
            format!("Echo({})", self.0.as_u32())
        }

        fn dispatch(&self, call: &CallRequest<'_>) -> Result<WireValue, CallError> {
            Ok(WireValue::from(call.method))
        }

        fn methods(&self) -> Vec<&str> {
            vec!["*"]
        }
    }

    /// Bound object whose liveness is switched from the test.
    struct Switch(Arc<AtomicBool>);

    impl BoundObject for Switch {
        fn describe(&self) -> String {
            "Switch".to_string()
        }

        fn dispatch(&self, _call: &CallRequest<'_>) -> Result<WireValue, CallError> {
            Ok(WireValue::None)
        }

        fn methods(&self) -> Vec<&str> {
            Vec::new()
        }

        fn is_live(&self) -> bool {
            self.0.load(Ordering::Acquire)
        }
    }

    fn switch(live: &Arc<AtomicBool>) -> Result<Arc<dyn BoundObject>, CallError> {
        Ok(Arc::new(Switch(Arc::clone(live))))
    }

    fn bind_failed(entity: u32) -> Result<Arc<dyn BoundObject>, CallError> {
        Err(CallError::BindFailed {
            service: "echo".to_string(),
            entity: EntityId::new(entity),
        })
    }

    fn echo(entity: u32) -> Result<Arc<dyn BoundObject>, CallError> {
        Ok(Arc::new(Echo(EntityId::new(entity))))
    }

    fn key(client: u64, entity: u32) -> BindKey {
        BindKey::new(ClientId::new(client), EntityId::new(entity), "echo")
    }

    #[test]
    fn test_bind_is_idempotent_per_key() {
        let table = BoundObjectTable::new();
        let (first, created) = table.bind_or_get(key(1, 10), || echo(10)).unwrap();
        assert!(created);
        let (second, created) = table
            .bind_or_get(key(1, 10), || panic!("must not create twice"))
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_distinct_keys_get_distinct_handles() {
        let table = BoundObjectTable::new();
        let (a, _) = table.bind_or_get(key(1, 10), || echo(10)).unwrap();
        let (b, _) = table.bind_or_get(key(2, 10), || echo(10)).unwrap();
        let (c, _) = table.bind_or_get(key(1, 11), || echo(11)).unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(table.len(), 3);
        assert_eq!(table.session_len(ClientId::new(1)), 2);
    }

    #[test]
    fn test_failed_create_leaves_table_unchanged() {
        let table = BoundObjectTable::new();
        let err = table
            .bind_or_get(key(1, 99), || {
                Err(CallError::BindFailed {
                    service: "echo".to_string(),
                    entity: EntityId::new(99),
                })
            })
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BindFailed);
        assert!(table.is_empty());
        assert_eq!(table.stats().total_bound, 0);
    }

    #[test]
    fn test_release_session_expires_handles() {
        let table = BoundObjectTable::new();
        let (mine, _) = table.bind_or_get(key(1, 10), || echo(10)).unwrap();
        let (theirs, _) = table.bind_or_get(key(2, 10), || echo(10)).unwrap();

        assert_eq!(table.release_session(ClientId::new(1)), 1);
        assert!(mine.is_released());
        assert!(!theirs.is_released());
        assert_eq!(
            table.lookup(mine.id()).unwrap_err().code(),
            ErrorCode::HandleExpired
        );
        assert!(table.lookup(theirs.id()).is_ok());

        // second release is a no-op
        assert_eq!(table.release_session(ClientId::new(1)), 0);
        assert_eq!(table.stats().total_released, 1);
    }

    #[test]
    fn test_release_entity_spans_clients() {
        let table = BoundObjectTable::new();
        table.bind_or_get(key(1, 10), || echo(10)).unwrap();
        table.bind_or_get(key(2, 10), || echo(10)).unwrap();
        table.bind_or_get(key(2, 11), || echo(11)).unwrap();

        assert_eq!(table.release_entity(EntityId::new(10)), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_released_handle_rejects_calls() {
        let table = BoundObjectTable::new();
        let (handle, _) = table.bind_or_get(key(1, 10), || echo(10)).unwrap();
        let client = ClientContext::new(ClientId::new(1), CharacterId::new(7), "pilot");
        let call = CallRequest::new("echo", "Ping", &[], &client);

        assert_eq!(handle.call(&call), Ok(WireValue::from("Ping")));
        assert!(table.release(handle.id()));
        assert!(!table.release(handle.id()));
        assert_eq!(
            handle.call(&call),
            Err(CallError::HandleExpired { handle: handle.id() })
        );
    }

    #[test]
    fn test_rebind_after_release_gets_new_handle() {
        let table = BoundObjectTable::new();
        let (old, _) = table.bind_or_get(key(1, 10), || echo(10)).unwrap();
        table.release_session(ClientId::new(1));
        let (new, created) = table.bind_or_get(key(1, 10), || echo(10)).unwrap();
        assert!(created);
        assert_ne!(old.id(), new.id());
    }

    #[test]
    fn test_dead_handle_is_replaced_on_bind() {
        let table = BoundObjectTable::new();
        let old_live = Arc::new(AtomicBool::new(true));
        let (old, _) = table.bind_or_get(key(1, 10), || switch(&old_live)).unwrap();

        old_live.store(false, Ordering::Release);
        let new_live = Arc::new(AtomicBool::new(true));
        let (new, created) = table.bind_or_get(key(1, 10), || switch(&new_live)).unwrap();

        assert!(created);
        assert_ne!(old.id(), new.id());
        assert!(old.is_released());
        assert!(table.lookup(old.id()).is_err());
        assert!(Arc::ptr_eq(&table.lookup(new.id()).unwrap(), &new));
        assert_eq!(table.len(), 1);

        let stats = table.stats();
        assert_eq!(stats.total_bound, 2);
        assert_eq!(stats.total_released, 1);
    }

    #[test]
    fn test_dead_handle_with_failing_create_is_dropped() {
        let table = BoundObjectTable::new();
        let live = Arc::new(AtomicBool::new(true));
        let (old, _) = table.bind_or_get(key(1, 10), || switch(&live)).unwrap();

        live.store(false, Ordering::Release);
        let err = table.bind_or_get(key(1, 10), || bind_failed(10)).unwrap_err();

        assert_eq!(err.code(), ErrorCode::BindFailed);
        assert!(old.is_released());
        assert!(table.lookup(old.id()).is_err());
        assert!(table.is_empty());
        assert_eq!(table.stats().total_released, 1);
    }

    #[test]
    fn test_live_handle_is_reused_without_create() {
        let table = BoundObjectTable::new();
        let live = Arc::new(AtomicBool::new(true));
        let (first, _) = table.bind_or_get(key(1, 10), || switch(&live)).unwrap();
        let (second, created) = table.bind_or_get(key(1, 10), || bind_failed(10)).unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_bulk_release_leaves_nothing_reachable() {
        let table = BoundObjectTable::new();
        let handles: Vec<_> = (10..20)
            .map(|entity| table.bind_or_get(key(1, entity), || echo(entity)).unwrap().0)
            .collect();
        let (other, _) = table.bind_or_get(key(2, 10), || echo(10)).unwrap();

        assert_eq!(table.release_session(ClientId::new(1)), handles.len());
        for handle in &handles {
            assert!(handle.is_released());
            assert!(table.lookup(handle.id()).is_err());
        }
        assert_eq!(table.by_id.len(), 1);
        assert!(!other.is_released());
        assert_eq!(table.stats().total_released, handles.len() as u64);
    }
}
