// Concurrent bind/release tests
// Many sessions binding, calling and disconnecting at once, with entity
// removal arriving from outside the sessions

use std::sync::Arc;

use evemu_core::{CharacterId, ClientId, DumpLevel, EntityId, ErrorCode, WireValue};
use evemu_server::{
    register_agent_services, Agent, ClientContext, Collaborators, InMemoryEntityRegistry,
    InMemoryMissionStore, InMemoryStaticData, ServerConfig, ServiceManager, AGENT_MGR,
};
use tokio::task::JoinSet;

fn agent(id: u32) -> Agent {
    Agent {
        agent_id: EntityId::new(id),
        agent_type_id: 2,
        division_id: 22,
        level: 1,
        station_id: 60014683,
        corporation_id: 1000167,
        solar_system_id: 30002776,
    }
}

fn setup(agent_ids: &[u32]) -> (Arc<ServiceManager>, Arc<InMemoryEntityRegistry>) {
    let agents: Vec<_> = agent_ids.iter().copied().map(agent).collect();
    let entities = Arc::new(InMemoryEntityRegistry::new());
    for a in &agents {
        entities.insert_agent(a.clone());
    }

    let manager = ServiceManager::new(ServerConfig {
        dump_level: DumpLevel::Off,
        ..ServerConfig::default()
    });
    register_agent_services(
        &manager,
        Collaborators {
            entities: entities.clone(),
            static_data: Arc::new(InMemoryStaticData::new(&agents)),
            missions: Arc::new(InMemoryMissionStore::new()),
        },
    );
    (Arc::new(manager), entities)
}

fn client(id: u64) -> ClientContext {
    ClientContext::new(
        ClientId::new(id),
        CharacterId::new(90000000 + id as u32),
        format!("Pilot{}", id),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_binds_share_one_handle() {
    let (manager, _) = setup(&[3010819]);
    let pilot = client(1);

    let mut tasks = JoinSet::new();
    for _ in 0..32 {
        let manager = Arc::clone(&manager);
        let pilot = pilot.clone();
        tasks.spawn(async move {
            manager
                .bind(AGENT_MGR, &WireValue::Int(3010819), &pilot)
                .map(|bound| bound.handle.id())
        });
    }

    let mut ids = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        ids.push(joined.unwrap().unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(manager.bound_objects().len(), 1);
    assert_eq!(manager.bound_stats().total_bound, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_bind_call_disconnect() {
    let (manager, _) = setup(&[3010819, 3010820]);

    let mut tasks = JoinSet::new();
    for id in 1..=16u64 {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move {
            let pilot = client(id);
            let agent_id = if id % 2 == 0 { 3010819 } else { 3010820 };
            let bound = manager
                .bind(AGENT_MGR, &WireValue::Int(agent_id), &pilot)
                .unwrap();
            tokio::task::yield_now().await;

            let result = manager.call_bound(bound.handle.id(), "GetAgentID", &[], &pilot);
            assert_eq!(result, Ok(WireValue::Int(agent_id)));

            assert_eq!(manager.disconnect(pilot.client_id), 1);
            let err = manager
                .call_bound(bound.handle.id(), "GetAgentID", &[], &pilot)
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::HandleExpired);
        });
    }

    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let stats = manager.bound_stats();
    assert_eq!(stats.live_handles, 0);
    assert_eq!(stats.total_bound, 16);
    assert_eq!(stats.total_released, 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_entity_removal_races_with_binds() {
    let (manager, entities) = setup(&[3010819]);
    let target = EntityId::new(3010819);

    let mut tasks = JoinSet::new();
    for id in 1..=16u64 {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move {
            let pilot = client(id);
            // either outcome is fine, a half-released handle is not
            match manager.bind(AGENT_MGR, &WireValue::Int(3010819), &pilot) {
                Ok(bound) => {
                    tokio::task::yield_now().await;
                    match manager.call_bound(bound.handle.id(), "GetAgentID", &[], &pilot) {
                        Ok(value) => assert_eq!(value, WireValue::Int(3010819)),
                        Err(err) => assert_eq!(err.code(), ErrorCode::HandleExpired),
                    }
                }
                Err(err) => assert_eq!(err.code(), ErrorCode::BindFailed),
            }
        });
    }

    let remover = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            entities.remove_agent(target);
            manager.entity_removed(target)
        })
    };

    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }
    remover.await.unwrap();

    // sweep anything bound between the registry removal and the release
    manager.entity_removed(target);
    assert_eq!(manager.bound_objects().len(), 0);

    let stats = manager.bound_stats();
    assert_eq!(stats.total_bound, stats.total_released);
}
