//! Routing of incoming calls to services and bound objects.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use evemu_core::{
    decode_with_limits, encode, CallError, ClientId, CodecError, DecodeError, EntityId, HandleId,
    WireValue,
};
use tracing::{debug, error, warn};

use crate::bound::{BindKey, BoundObjectHandle, BoundObjectTable, BoundStats};
use crate::config::ServerConfig;
use crate::service::{CallRequest, ClientContext, Service};

/// Result of a successful bind.
#[derive(Debug, Clone)]
pub struct BindResult {
    pub handle: Arc<BoundObjectHandle>,
    /// False when an existing binding was returned.
    pub created: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("Malformed request: {0}")]
    Request(#[source] CodecError),

    #[error("Failed to encode response: {0}")]
    Response(#[source] CodecError),
}

/// Owns every registered service and the bound object index.
pub struct ServiceManager {
    services: DashMap<String, Arc<dyn Service>>,
    bound: BoundObjectTable,
    config: ServerConfig,
}

impl ServiceManager {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            services: DashMap::new(),
            bound: BoundObjectTable::new(),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a service under its own name. Called during startup only.
    ///
    /// # Panics
    ///
    /// Registering two services with the same name is a programming error.
    pub fn register_service(&self, service: Arc<dyn Service>) {
        let name = service.name().to_string();
        debug!(
            target: "evemu::service",
            "Registering service {} ({} methods)",
            name,
            service.methods().len()
        );
        let previous = self.services.insert(name.clone(), service);
        assert!(previous.is_none(), "service {} registered twice", name);
    }

    pub fn lookup_service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).map(|entry| Arc::clone(&*entry))
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Dispatch a call on a named service.
    pub fn dispatch(
        &self,
        service: &str,
        method: &str,
        args: &[WireValue],
        client: &ClientContext,
    ) -> Result<WireValue, CallError> {
        let Some(target) = self.lookup_service(service) else {
            warn!(
                target: "evemu::service",
                "{}: call to unknown service {}::{}",
                client.name,
                service,
                method
            );
            return Err(CallError::service_not_found(service));
        };

        let call = CallRequest::new(service, method, args, client);
        let result = target.dispatch(&call);
        log_outcome(&call, &result);
        result
    }

    /// Collapse a call result into the value sent back to the client.
    pub fn respond(result: Result<WireValue, CallError>) -> WireValue {
        match result {
            Ok(value) => value,
            Err(err) => err.to_wire(),
        }
    }

    /// Dispatch a call whose argument tuple is still in marshal form and
    /// encode the response. Call failures are encoded as error objects; only
    /// a malformed stream fails the whole exchange.
    pub fn dispatch_marshaled(
        &self,
        service: &str,
        method: &str,
        payload: &[u8],
        client: &ClientContext,
    ) -> Result<Bytes, MarshalError> {
        let decoded = decode_with_limits(payload, self.config.decode_limits())
            .map_err(MarshalError::Request)?;

        let result = match decoded {
            WireValue::Tuple(args) => self.dispatch(service, method, &args, client),
            other => {
                let err = DecodeError::Type {
                    position: 0,
                    expected: "Tuple",
                    actual: other.type_name(),
                };
                error!(
                    target: "evemu::service",
                    "{}: {}::{} arguments are not a tuple: {}",
                    client.name,
                    service,
                    method,
                    err
                );
                Err(CallError::Decode(err))
            }
        };

        encode(&Self::respond(result)).map_err(MarshalError::Response)
    }

    /// Bind `service` to the entity named by `bind_args`. Repeated binds of
    /// the same entity by the same client return the existing handle as long
    /// as its object is still live.
    pub fn bind(
        &self,
        service: &str,
        bind_args: &WireValue,
        client: &ClientContext,
    ) -> Result<BindResult, CallError> {
        let Some(raw_id) = bind_args.as_int() else {
            error!(
                target: "evemu::service",
                "{}: Non-integer argument '{}'",
                client.name,
                bind_args.type_name()
            );
            return Err(CallError::Decode(DecodeError::Type {
                position: 0,
                expected: "Int",
                actual: bind_args.type_name(),
            }));
        };
        let Ok(entity) = u32::try_from(raw_id).map(EntityId::new) else {
            error!(
                target: "evemu::service",
                "{}: Negative bind argument {}",
                client.name,
                raw_id
            );
            return Err(CallError::Decode(DecodeError::Type {
                position: 0,
                expected: "non-negative Int",
                actual: "Int",
            }));
        };

        let target = self
            .lookup_service(service)
            .ok_or_else(|| CallError::service_not_found(service))?;
        let bindable = target
            .as_bindable()
            .ok_or_else(|| CallError::method_not_found(service, "bind"))?;

        let key = BindKey::new(client.client_id, entity, service);
        let (handle, created) = self
            .bound
            .bind_or_get(key, || bindable.create_bound(entity, client))?;

        if !created {
            debug!(
                target: "evemu::service",
                "{}: reusing {} for {} on {}",
                client.name,
                handle.id(),
                service,
                entity
            );
        }
        Ok(BindResult { handle, created })
    }

    /// Call a method on a bound object.
    pub fn call_bound(
        &self,
        handle_id: HandleId,
        method: &str,
        args: &[WireValue],
        client: &ClientContext,
    ) -> Result<WireValue, CallError> {
        let handle = self.bound.lookup(handle_id).inspect_err(|_| {
            warn!(
                target: "evemu::service",
                "{}: call {} on released handle {}",
                client.name,
                method,
                handle_id
            );
        })?;

        if handle.owner() != client.client_id {
            warn!(
                target: "evemu::service",
                "{}: handle {} belongs to {}",
                client.name,
                handle_id,
                handle.owner()
            );
            return Err(CallError::HandleExpired { handle: handle_id });
        }

        if !handle.object().is_live() {
            debug!(
                target: "evemu::service",
                "{} is no longer live, releasing {}",
                handle.object().describe(),
                handle_id
            );
            self.bound.release(handle_id);
            return Err(CallError::HandleExpired { handle: handle_id });
        }

        let call = CallRequest::new(handle.service(), method, args, client);
        let result = handle.call(&call);
        log_outcome(&call, &result);
        result
    }

    /// Release everything the client had bound. Called when its session ends.
    pub fn disconnect(&self, client: ClientId) -> usize {
        let released = self.bound.release_session(client);
        debug!(
            target: "evemu::service",
            "{} disconnected, released {} bound objects",
            client,
            released
        );
        released
    }

    /// Release every binding to an entity that left the world.
    pub fn entity_removed(&self, entity: EntityId) -> usize {
        let released = self.bound.release_entity(entity);
        if released > 0 {
            debug!(
                target: "evemu::service",
                "{} removed, released {} bound objects",
                entity,
                released
            );
        }
        released
    }

    pub fn bound_objects(&self) -> &BoundObjectTable {
        &self.bound
    }

    pub fn bound_stats(&self) -> BoundStats {
        self.bound.stats()
    }
}

fn log_outcome(call: &CallRequest<'_>, result: &Result<WireValue, CallError>) {
    match result {
        Ok(_) => debug!(
            target: "evemu::service",
            "{}: {}::{} ok",
            call.client.name,
            call.service,
            call.method
        ),
        Err(err) => warn!(
            target: "evemu::service",
            code = %err.code(),
            "{}: {}::{} failed: {}",
            call.client.name,
            call.service,
            call.method,
            err
        ),
    }
}

impl fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceManager")
            .field("services", &self.service_names())
            .field("bound", &self.bound.stats())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentMgrService, EpicArcService, AGENT_MGR, EPIC_ARC_STATUS};
    use crate::collab::{
        Agent, Collaborators, InMemoryEntityRegistry, InMemoryMissionStore, InMemoryStaticData,
    };
    use evemu_core::{decode, CharacterId, DumpLevel, ErrorCode, CALL_ERROR_TYPE};

    const AGENT_ID: u32 = 3010819;

    fn manager() -> (ServiceManager, Arc<InMemoryEntityRegistry>) {
        let agent = Agent {
            agent_id: EntityId::new(AGENT_ID),
            agent_type_id: 2,
            division_id: 22,
            level: 1,
            station_id: 60014683,
            corporation_id: 1000167,
            solar_system_id: 30002776,
        };
        let entities = Arc::new(InMemoryEntityRegistry::new());
        let static_data = Arc::new(InMemoryStaticData::new([&agent]));
        entities.insert_agent(agent);

        let manager = ServiceManager::new(ServerConfig::default());
        manager.register_service(Arc::new(AgentMgrService::new(
            Collaborators {
                entities: entities.clone(),
                static_data,
                missions: Arc::new(InMemoryMissionStore::new()),
            },
            DumpLevel::Off,
        )));
        manager.register_service(Arc::new(EpicArcService::new(DumpLevel::Off)));
        (manager, entities)
    }

    fn client(id: u64) -> ClientContext {
        ClientContext::new(ClientId::new(id), CharacterId::new(90000000 + id as u32), "pilot")
    }

    #[test]
    fn test_unknown_service_and_method() {
        let (manager, _) = manager();
        let pilot = client(1);
        assert_eq!(
            manager.dispatch("nope", "Anything", &[], &pilot).unwrap_err().code(),
            ErrorCode::ServiceNotFound
        );
        assert_eq!(
            manager.dispatch(AGENT_MGR, "Nope", &[], &pilot).unwrap_err().code(),
            ErrorCode::MethodNotFound
        );
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_service_panics() {
        let (manager, _) = manager();
        manager.register_service(Arc::new(EpicArcService::new(DumpLevel::Off)));
    }

    #[test]
    fn test_respond_wraps_errors() {
        let value = ServiceManager::respond(Err(CallError::service_not_found("x")));
        assert!(matches!(value, WireValue::Object { ref type_tag, .. } if type_tag == CALL_ERROR_TYPE));
        assert_eq!(ServiceManager::respond(Ok(WireValue::Int(0))), WireValue::Int(0));
    }

    #[test]
    fn test_dispatch_marshaled() {
        let (manager, _) = manager();
        let pilot = client(1);
        let payload = encode(&WireValue::tuple([WireValue::Int(AGENT_ID as i32)])).unwrap();

        let response = manager
            .dispatch_marshaled(EPIC_ARC_STATUS, "AgentHasEpicMissionsForCharacter", &payload, &pilot)
            .unwrap();
        assert_eq!(decode(&response).unwrap(), WireValue::Bool(false));

        // not a tuple: an error object comes back
        let payload = encode(&WireValue::Int(1)).unwrap();
        let response = manager
            .dispatch_marshaled(AGENT_MGR, "GetAgents", &payload, &pilot)
            .unwrap();
        let WireValue::Object { type_tag, .. } = decode(&response).unwrap() else {
            panic!("expected error object");
        };
        assert_eq!(type_tag, CALL_ERROR_TYPE);

        let err = manager
            .dispatch_marshaled(AGENT_MGR, "GetAgents", &[0x00], &pilot)
            .unwrap_err();
        assert!(matches!(err, MarshalError::Request(_)));
    }

    #[test]
    fn test_bind_rejects_negative_id() {
        let (manager, _) = manager();
        let err = manager
            .bind(AGENT_MGR, &WireValue::Int(-5), &client(1))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecodeError);
        assert!(manager.bound_objects().is_empty());
    }

    #[test]
    fn test_bind_on_unbindable_service() {
        let (manager, _) = manager();
        let err = manager
            .bind(EPIC_ARC_STATUS, &WireValue::Int(AGENT_ID as i32), &client(1))
            .unwrap_err();
        assert_eq!(err, CallError::method_not_found(EPIC_ARC_STATUS, "bind"));
    }

    #[test]
    fn test_handle_is_owned_by_binding_client() {
        let (manager, _) = manager();
        let owner = client(1);
        let other = client(2);
        let bound = manager
            .bind(AGENT_MGR, &WireValue::Int(AGENT_ID as i32), &owner)
            .unwrap();

        let err = manager
            .call_bound(bound.handle.id(), "GetAgentID", &[], &other)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::HandleExpired);

        // the owner is unaffected
        assert_eq!(
            manager.call_bound(bound.handle.id(), "GetAgentID", &[], &owner),
            Ok(WireValue::Int(AGENT_ID as i32))
        );
    }

    #[test]
    fn test_lazy_release_when_agent_disappears() {
        let (manager, entities) = manager();
        let pilot = client(1);
        let bound = manager
            .bind(AGENT_MGR, &WireValue::Int(AGENT_ID as i32), &pilot)
            .unwrap();

        entities.remove_agent(EntityId::new(AGENT_ID));

        let err = manager
            .call_bound(bound.handle.id(), "GetAgentID", &[], &pilot)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::HandleExpired);
        assert!(bound.handle.is_released());
        assert!(manager.bound_objects().is_empty());
    }

    #[test]
    fn test_entity_removed_releases_all_clients() {
        let (manager, _) = manager();
        for id in 1..=3 {
            manager
                .bind(AGENT_MGR, &WireValue::Int(AGENT_ID as i32), &client(id))
                .unwrap();
        }
        assert_eq!(manager.bound_objects().len(), 3);
        assert_eq!(manager.entity_removed(EntityId::new(AGENT_ID)), 3);
        assert_eq!(manager.bound_stats().total_released, 3);
    }

    #[test]
    fn test_bound_method_not_found() {
        let (manager, _) = manager();
        let pilot = client(1);
        let bound = manager
            .bind(AGENT_MGR, &WireValue::Int(AGENT_ID as i32), &pilot)
            .unwrap();
        let err = manager
            .call_bound(bound.handle.id(), "GetAgents", &[], &pilot)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MethodNotFound);
    }
}
