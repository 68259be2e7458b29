//! Subsystems the agent services query but do not own, plus in-memory
//! implementations used by the binary and the tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use evemu_core::{CharacterId, EntityId, WireValue};
use tracing::warn;

/// Seconds between 1601-01-01 and the unix epoch.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;

/// Convert a timestamp to the client's 100ns-since-1601 representation.
pub fn to_filetime(time: DateTime<Utc>) -> i64 {
    (time.timestamp() + FILETIME_EPOCH_OFFSET) * FILETIME_TICKS_PER_SECOND
        + i64::from(time.timestamp_subsec_nanos()) / 100
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub agent_id: EntityId,
    pub agent_type_id: i32,
    pub division_id: i32,
    pub level: i32,
    pub station_id: i32,
    pub corporation_id: i32,
    pub solar_system_id: i32,
}

/// Location bookmark attached to a mission offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub item_id: i32,
    pub type_id: i32,
    pub agent_id: i32,
    pub hint: String,
    pub location_type: String,
    pub location_id: i32,
    pub solar_system_id: i32,
    pub owner_id: i32,
    pub created: i64,
}

impl Bookmark {
    pub fn to_wire(&self) -> WireValue {
        WireValue::object(
            "util.KeyVal",
            WireValue::dict([
                ("itemID", WireValue::Int(self.item_id)),
                ("typeID", WireValue::Int(self.type_id)),
                ("agentID", WireValue::Int(self.agent_id)),
                ("hint", WireValue::from(self.hint.as_str())),
                ("locationType", WireValue::from(self.location_type.as_str())),
                ("memo", WireValue::from("")),
                ("created", WireValue::Long(self.created)),
                ("locationNumber", WireValue::Int(0)),
                ("flag", WireValue::None),
                ("locationID", WireValue::Int(self.location_id)),
                ("ownerID", WireValue::Int(self.owner_id)),
                ("y", WireValue::Int(0)),
                ("x", WireValue::Int(0)),
                ("solarsystemID", WireValue::Int(self.solar_system_id)),
                ("z", WireValue::Int(0)),
            ]),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionOffer {
    pub state_id: i32,
    pub important: bool,
    pub type_id: u8,
    pub name: String,
    pub agent_id: i32,
    pub expiry_time: i64,
    pub bookmarks: Vec<Bookmark>,
    pub remote_offerable: bool,
    pub remote_completable: bool,
}

/// Live game entities. Lookups must not have side effects.
pub trait EntityRegistry: Send + Sync + fmt::Debug {
    fn get_agent(&self, id: EntityId) -> Option<Arc<Agent>>;
}

/// Prebuilt response trees, returned to clients as-is.
pub trait StaticDataCache: Send + Sync + fmt::Debug {
    fn get_agents(&self) -> WireValue;
    fn get_agent_system_id(&self, agent_id: i32) -> WireValue;
}

pub trait MissionDataStore: Send + Sync + fmt::Debug {
    /// Offers for `character`, in the order the journal shows them.
    fn load_mission_offers(&self, character: CharacterId) -> Vec<MissionOffer>;
    fn type_label(&self, type_id: u8) -> String;
}

/// The collaborators a service is built with.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub entities: Arc<dyn EntityRegistry>,
    pub static_data: Arc<dyn StaticDataCache>,
    pub missions: Arc<dyn MissionDataStore>,
}

#[derive(Debug, Default)]
pub struct InMemoryEntityRegistry {
    agents: DashMap<EntityId, Arc<Agent>>,
}

impl InMemoryEntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_agent(&self, agent: Agent) -> Arc<Agent> {
        let agent = Arc::new(agent);
        self.agents.insert(agent.agent_id, Arc::clone(&agent));
        agent
    }

    pub fn remove_agent(&self, id: EntityId) -> Option<Arc<Agent>> {
        self.agents.remove(&id).map(|(_, agent)| agent)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl EntityRegistry for InMemoryEntityRegistry {
    fn get_agent(&self, id: EntityId) -> Option<Arc<Agent>> {
        self.agents.get(&id).map(|entry| Arc::clone(&*entry))
    }
}

const AGENT_COLUMNS: [&str; 7] = [
    "agentID",
    "agentTypeID",
    "divisionID",
    "level",
    "stationID",
    "corporationID",
    "solarSystemID",
];

/// Static data built once from the agent table. Agents whose id has no wire
/// `Int` form are left out.
#[derive(Debug)]
pub struct InMemoryStaticData {
    agents: WireValue,
    systems: HashMap<i32, i32>,
}

impl InMemoryStaticData {
    pub fn new<'a>(agents: impl IntoIterator<Item = &'a Agent>) -> Self {
        let mut systems = HashMap::new();
        let mut lines = Vec::new();
        for agent in agents {
            let Ok(id) = i32::try_from(agent.agent_id) else {
                warn!(
                    target: "evemu::agent",
                    "Skipping {}: id does not fit a wire Int",
                    agent.agent_id
                );
                continue;
            };
            systems.insert(id, agent.solar_system_id);
            lines.push(WireValue::list([
                WireValue::Int(id),
                WireValue::Int(agent.agent_type_id),
                WireValue::Int(agent.division_id),
                WireValue::Int(agent.level),
                WireValue::Int(agent.station_id),
                WireValue::Int(agent.corporation_id),
                WireValue::Int(agent.solar_system_id),
            ]));
        }

        let agents = WireValue::object(
            "util.Rowset",
            WireValue::dict([
                (
                    "header",
                    WireValue::list(AGENT_COLUMNS.iter().map(|c| WireValue::from(*c))),
                ),
                ("RowClass", WireValue::from("util.Row")),
                ("lines", WireValue::List(lines)),
            ]),
        );

        Self { agents, systems }
    }
}

impl StaticDataCache for InMemoryStaticData {
    fn get_agents(&self) -> WireValue {
        self.agents.clone()
    }

    fn get_agent_system_id(&self, agent_id: i32) -> WireValue {
        self.systems
            .get(&agent_id)
            .map(|system| WireValue::Int(*system))
            .unwrap_or(WireValue::None)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMissionStore {
    offers: DashMap<CharacterId, Vec<MissionOffer>>,
}

impl InMemoryMissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_offer(&self, character: CharacterId, offer: MissionOffer) {
        self.offers.entry(character).or_default().push(offer);
    }

    pub fn clear_offers(&self, character: CharacterId) {
        self.offers.remove(&character);
    }
}

impl MissionDataStore for InMemoryMissionStore {
    fn load_mission_offers(&self, character: CharacterId) -> Vec<MissionOffer> {
        self.offers
            .get(&character)
            .map(|offers| offers.clone())
            .unwrap_or_default()
    }

    fn type_label(&self, type_id: u8) -> String {
        match type_id {
            1 => "Encounter",
            2 => "Courier",
            3 => "Mining",
            4 => "Trade",
            5 => "Research",
            6 => "Storyline",
            _ => "Unknown",
        }
        .to_string()
    }
}
