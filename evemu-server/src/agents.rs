//! `agentMgr` and `epicArcStatus`, and the per-agent bound object.

use std::fmt;
use std::sync::{Arc, Weak};

use evemu_core::{dump, AnyArgs, CallError, DumpLevel, EntityId, SingleIntArg, WireValue};
use tracing::{error, info};

use crate::bound::{BindableService, BoundObject};
use crate::collab::{Agent, Collaborators, EntityRegistry, MissionOffer};
use crate::manager::ServiceManager;
use crate::registry::CallRegistry;
use crate::service::{CallRequest, ClientContext, Service};

pub const AGENT_MGR: &str = "agentMgr";
pub const EPIC_ARC_STATUS: &str = "epicArcStatus";

/// Register `agentMgr` and `epicArcStatus` on `manager`.
pub fn register_agent_services(manager: &ServiceManager, collab: Collaborators) {
    let dump_level = manager.config().dump_level;
    manager.register_service(Arc::new(AgentMgrService::new(collab, dump_level)));
    manager.register_service(Arc::new(EpicArcService::new(dump_level)));
}

pub struct AgentMgrService {
    collab: Collaborators,
    dump_level: DumpLevel,
    calls: CallRegistry<AgentMgrService>,
}

impl AgentMgrService {
    pub fn new(collab: Collaborators, dump_level: DumpLevel) -> Self {
        let mut calls = CallRegistry::<Self>::new(AGENT_MGR);
        calls
            .register("GetAgents", Self::get_agents)
            .register("GetCareerAgents", Self::get_career_agents)
            .register("GetMyJournalDetails", Self::get_my_journal_details)
            .register("GetSolarSystemOfAgent", Self::get_solar_system_of_agent)
            .register("GetMyEpicJournalDetails", Self::get_my_epic_journal_details);

        Self {
            collab,
            dump_level,
            calls,
        }
    }

    /// Cached on the client side, so this is normally called once per login.
    fn get_agents(&self, _call: &CallRequest<'_>, _args: AnyArgs) -> anyhow::Result<WireValue> {
        Ok(self.collab.static_data.get_agents())
    }

    fn get_solar_system_of_agent(
        &self,
        _call: &CallRequest<'_>,
        SingleIntArg(agent_id): SingleIntArg,
    ) -> anyhow::Result<WireValue> {
        Ok(self.collab.static_data.get_agent_system_id(agent_id))
    }

    fn get_my_journal_details(
        &self,
        call: &CallRequest<'_>,
        _args: AnyArgs,
    ) -> anyhow::Result<WireValue> {
        info!(
            target: "evemu::agent",
            "GetMyJournalDetails - size= {}",
            call.args.len()
        );
        call.dump(self.dump_level);

        let missions = self
            .collab
            .missions
            .load_mission_offers(call.client.character_id)
            .iter()
            .map(|offer| self.journal_entry(offer))
            .collect::<Vec<_>>();

        // research agents are not tracked yet
        let research = WireValue::empty_list();

        let details = WireValue::tuple([WireValue::List(missions), research]);
        dump(self.dump_level, "GetMyJournalDetails response", &details);
        Ok(details)
    }

    /// Journal row, in the column order the client unpacks:
    /// state, important, type label, name, agent, expiry, bookmarks,
    /// remote offerable, remote completable.
    fn journal_entry(&self, offer: &MissionOffer) -> WireValue {
        WireValue::tuple([
            WireValue::Int(offer.state_id),
            WireValue::Int(i32::from(offer.important)),
            WireValue::from(self.collab.missions.type_label(offer.type_id)),
            WireValue::from(offer.name.as_str()),
            WireValue::Int(offer.agent_id),
            WireValue::Long(offer.expiry_time),
            WireValue::list(offer.bookmarks.iter().map(|b| b.to_wire())),
            WireValue::Bool(offer.remote_offerable),
            WireValue::Bool(offer.remote_completable),
        ])
    }

    fn get_my_epic_journal_details(
        &self,
        call: &CallRequest<'_>,
        _args: AnyArgs,
    ) -> anyhow::Result<WireValue> {
        info!(
            target: "evemu::agent",
            "GetMyEpicJournalDetails - size= {}",
            call.args.len()
        );
        Ok(WireValue::empty_list())
    }

    fn get_career_agents(&self, call: &CallRequest<'_>, _args: AnyArgs) -> anyhow::Result<i32> {
        info!(
            target: "evemu::agent",
            "GetCareerAgents - size= {}",
            call.args.len()
        );
        call.dump(self.dump_level);
        Ok(0)
    }
}

impl Service for AgentMgrService {
    fn name(&self) -> &str {
        AGENT_MGR
    }

    fn dispatch(&self, call: &CallRequest<'_>) -> Result<WireValue, CallError> {
        self.calls.invoke(self, call)
    }

    fn methods(&self) -> Vec<&str> {
        self.calls.methods()
    }

    fn as_bindable(&self) -> Option<&dyn BindableService> {
        Some(self)
    }
}

impl BindableService for AgentMgrService {
    fn create_bound(
        &self,
        entity: EntityId,
        client: &ClientContext,
    ) -> Result<Arc<dyn BoundObject>, CallError> {
        let Some(agent) = self.collab.entities.get_agent(entity) else {
            error!(
                target: "evemu::agent",
                "{}: Unable to obtain agent {}",
                client.name,
                entity.as_u32()
            );
            return Err(CallError::BindFailed {
                service: AGENT_MGR.to_string(),
                entity,
            });
        };

        Ok(Arc::new(AgentBound::new(
            &agent,
            Arc::clone(&self.collab.entities),
        )))
    }
}

impl fmt::Debug for AgentMgrService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentMgrService")
            .field("dump_level", &self.dump_level)
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

/// Conversation with one agent, bound per client.
pub struct AgentBound {
    agent_id: EntityId,
    agent: Weak<Agent>,
    entities: Arc<dyn EntityRegistry>,
    calls: CallRegistry<AgentBound>,
}

impl AgentBound {
    pub fn new(agent: &Arc<Agent>, entities: Arc<dyn EntityRegistry>) -> Self {
        let mut calls = CallRegistry::<Self>::new("agentMgr.bound");
        calls
            .register("DoAction", Self::do_action)
            .register("WarpToLocation", Self::warp_to_location)
            .register("GetAgentID", Self::get_agent_id);

        Self {
            agent_id: agent.agent_id,
            agent: Arc::downgrade(agent),
            entities,
            calls,
        }
    }

    pub fn agent_id(&self) -> EntityId {
        self.agent_id
    }

    fn do_action(
        &self,
        call: &CallRequest<'_>,
        (action_id,): (Option<i32>,),
    ) -> anyhow::Result<()> {
        info!(
            target: "evemu::agent",
            "{}: DoAction({:?}) on agent {}",
            call.client.name,
            action_id,
            self.agent_id.as_u32()
        );
        Ok(())
    }

    fn warp_to_location(
        &self,
        call: &CallRequest<'_>,
        (location_type, location_number, warp_range, is_gang): (String, i32, i64, bool),
    ) -> anyhow::Result<()> {
        info!(
            target: "evemu::agent",
            "{}: WarpToLocation({}, {}, {}, gang={}) on agent {}",
            call.client.name,
            location_type,
            location_number,
            warp_range,
            is_gang,
            self.agent_id.as_u32()
        );
        Ok(())
    }

    fn get_agent_id(&self, _call: &CallRequest<'_>, _args: ()) -> anyhow::Result<i32> {
        i32::try_from(self.agent_id)
            .map_err(|_| anyhow::anyhow!("{} does not fit a wire Int", self.agent_id))
    }
}

impl BoundObject for AgentBound {
    fn describe(&self) -> String {
        format!("AgentBound({})", self.agent_id.as_u32())
    }

    fn dispatch(&self, call: &CallRequest<'_>) -> Result<WireValue, CallError> {
        self.calls.invoke(self, call)
    }

    fn methods(&self) -> Vec<&str> {
        self.calls.methods()
    }

    /// The agent must still be registered, and be the same instance this
    /// object was bound to.
    fn is_live(&self) -> bool {
        match (self.agent.upgrade(), self.entities.get_agent(self.agent_id)) {
            (Some(bound), Some(current)) => Arc::ptr_eq(&bound, &current),
            _ => false,
        }
    }
}

impl fmt::Debug for AgentBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBound")
            .field("agent_id", &self.agent_id)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

pub struct EpicArcService {
    dump_level: DumpLevel,
    calls: CallRegistry<EpicArcService>,
}

impl EpicArcService {
    pub fn new(dump_level: DumpLevel) -> Self {
        let mut calls = CallRegistry::<Self>::new(EPIC_ARC_STATUS);
        calls.register(
            "AgentHasEpicMissionsForCharacter",
            Self::agent_has_epic_missions_for_character,
        );
        Self { dump_level, calls }
    }

    fn agent_has_epic_missions_for_character(
        &self,
        call: &CallRequest<'_>,
        _args: AnyArgs,
    ) -> anyhow::Result<bool> {
        info!(
            target: "evemu::agent",
            "AgentHasEpicMissionsForCharacter - size= {}",
            call.args.len()
        );
        call.dump(self.dump_level);
        Ok(false)
    }
}

impl Service for EpicArcService {
    fn name(&self) -> &str {
        EPIC_ARC_STATUS
    }

    fn dispatch(&self, call: &CallRequest<'_>) -> Result<WireValue, CallError> {
        self.calls.invoke(self, call)
    }

    fn methods(&self) -> Vec<&str> {
        self.calls.methods()
    }
}

impl fmt::Debug for EpicArcService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpicArcService")
            .field("dump_level", &self.dump_level)
            .field("calls", &self.calls)
            .finish()
    }
}
