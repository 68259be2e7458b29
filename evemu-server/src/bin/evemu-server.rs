//! EVEmu agent service host.
//!
//! Builds the service manager with in-memory collaborators and drives a
//! scripted set of concurrent client sessions through the agent services.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use evemu_core::{dump, encode, CharacterId, EntityId, IdAllocator, WireValue};
use evemu_server::{
    init_logging, register_agent_services, to_filetime, Agent, ClientContext, Collaborators,
    InMemoryEntityRegistry, InMemoryMissionStore, InMemoryStaticData, MissionOffer, ServerConfig,
    ServiceManager, AGENT_MGR, EPIC_ARC_STATUS,
};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const FIRST_CHARACTER: u32 = 90000001;

fn seed_agents() -> Vec<Agent> {
    vec![
        Agent {
            agent_id: EntityId::new(3010819),
            agent_type_id: 2,
            division_id: 22,
            level: 1,
            station_id: 60014683,
            corporation_id: 1000167,
            solar_system_id: 30002776,
        },
        Agent {
            agent_id: EntityId::new(3010820),
            agent_type_id: 2,
            division_id: 24,
            level: 2,
            station_id: 60000016,
            corporation_id: 1000167,
            solar_system_id: 30002778,
        },
    ]
}

async fn run_session(
    manager: Arc<ServiceManager>,
    client: ClientContext,
    agent: EntityId,
) -> Result<()> {
    let level = manager.config().dump_level;
    let agent_arg = WireValue::Int(i32::try_from(agent).context("agent id out of range")?);

    // journal goes through the marshal path, like a real client request
    let payload = encode(&WireValue::Tuple(Vec::new()))?;
    let response =
        manager.dispatch_marshaled(AGENT_MGR, "GetMyJournalDetails", &payload, &client)?;
    info!("{}: journal response is {} bytes", client.name, response.len());
    tokio::task::yield_now().await;

    let system = manager.dispatch(
        AGENT_MGR,
        "GetSolarSystemOfAgent",
        std::slice::from_ref(&agent_arg),
        &client,
    );
    dump(level, "GetSolarSystemOfAgent", &ServiceManager::respond(system));

    let bound = manager.bind(AGENT_MGR, &agent_arg, &client)?;
    let again = manager.bind(AGENT_MGR, &agent_arg, &client)?;
    if bound.handle.id() != again.handle.id() {
        warn!("{}: second bind produced a new handle", client.name);
    }
    tokio::task::yield_now().await;

    let agent_id = manager.call_bound(bound.handle.id(), "GetAgentID", &[], &client);
    dump(level, "AgentBound::GetAgentID", &ServiceManager::respond(agent_id));
    let action = manager.call_bound(bound.handle.id(), "DoAction", &[WireValue::None], &client);
    dump(level, "AgentBound::DoAction", &ServiceManager::respond(action));

    let epic = manager.dispatch(
        EPIC_ARC_STATUS,
        "AgentHasEpicMissionsForCharacter",
        std::slice::from_ref(&agent_arg),
        &client,
    );
    dump(level, "AgentHasEpicMissionsForCharacter", &ServiceManager::respond(epic));

    let career = manager.dispatch(AGENT_MGR, "GetCareerAgents", &[], &client);
    dump(level, "GetCareerAgents", &ServiceManager::respond(career));

    // a malformed bind is rejected without touching the index
    if let Err(e) = manager.bind(AGENT_MGR, &WireValue::from("3010819"), &client) {
        info!("{}: bad bind rejected: {}", client.name, e);
    }

    manager.disconnect(client.client_id);
    let expired = manager.call_bound(bound.handle.id(), "GetAgentID", &[], &client);
    dump(level, "GetAgentID after disconnect", &ServiceManager::respond(expired));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load().context("loading server config")?;
    let _guard = init_logging(&config)?;

    info!("Starting EVEmu agent services");

    let agents = seed_agents();
    let entities = Arc::new(InMemoryEntityRegistry::new());
    let static_data = Arc::new(InMemoryStaticData::new(&agents));
    let missions = Arc::new(InMemoryMissionStore::new());

    let expiry = to_filetime(Utc::now() + Duration::days(7));
    for (i, agent) in agents.iter().enumerate() {
        entities.insert_agent(agent.clone());
        for n in 0..config.demo_clients {
            missions.add_offer(
                CharacterId::new(FIRST_CHARACTER + n as u32),
                MissionOffer {
                    state_id: 1,
                    important: i == 0,
                    type_id: if i == 0 { 1 } else { 2 },
                    name: (if i == 0 { "Seek and Destroy" } else { "Good Harvest" }).to_string(),
                    agent_id: i32::try_from(agent.agent_id).context("agent id out of range")?,
                    expiry_time: expiry,
                    bookmarks: Vec::new(),
                    remote_offerable: false,
                    remote_completable: false,
                },
            );
        }
    }

    let manager = Arc::new(ServiceManager::new(config.clone()));
    register_agent_services(
        &manager,
        Collaborators {
            entities: entities.clone(),
            static_data,
            missions,
        },
    );
    info!("Services: {:?}", manager.service_names());

    let ids = IdAllocator::new();
    let mut sessions = JoinSet::new();
    for n in 0..config.demo_clients {
        let client = ClientContext::new(
            ids.next_client(),
            CharacterId::new(FIRST_CHARACTER + n as u32),
            format!("Pilot{}", n + 1),
        );
        let agent = agents[n % agents.len()].agent_id;
        sessions.spawn(run_session(Arc::clone(&manager), client, agent));
    }

    while let Some(joined) = sessions.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Session failed: {:#}", e),
            Err(e) => error!("Session task panicked: {}", e),
        }
    }

    // an agent leaving the world invalidates every handle bound to it
    let observer = ClientContext::new(
        ids.next_client(),
        CharacterId::new(FIRST_CHARACTER),
        "Observer",
    );
    let gone = agents[0].agent_id;
    let gone_arg = WireValue::Int(i32::try_from(gone).context("agent id out of range")?);
    let bound = manager.bind(AGENT_MGR, &gone_arg, &observer)?;
    entities.remove_agent(gone);
    let released = manager.entity_removed(gone);
    info!("{} removed, {} handles released", gone, released);
    let result = manager.call_bound(bound.handle.id(), "GetAgentID", &[], &observer);
    dump(
        manager.config().dump_level,
        "GetAgentID on removed agent",
        &ServiceManager::respond(result),
    );

    let stats = manager.bound_stats();
    info!(
        "Done: {} bound, {} released, {} live",
        stats.total_bound, stats.total_released, stats.live_handles
    );
    Ok(())
}
