pub mod agents;
pub mod bound;
pub mod collab;
pub mod config;
pub mod logging;
pub mod manager;
pub mod registry;
pub mod service;

pub use agents::{
    register_agent_services, AgentBound, AgentMgrService, EpicArcService, AGENT_MGR,
    EPIC_ARC_STATUS,
};
pub use bound::{
    BindKey, BindableService, BoundObject, BoundObjectHandle, BoundObjectTable, BoundStats,
};
pub use collab::{
    to_filetime, Agent, Bookmark, Collaborators, EntityRegistry, InMemoryEntityRegistry,
    InMemoryMissionStore, InMemoryStaticData, MissionDataStore, MissionOffer, StaticDataCache,
};
pub use config::{ConfigError, ServerConfig, CONFIG_ENV};
pub use logging::{init_logging, init_test_logging, DEFAULT_FILTER};
pub use manager::{BindResult, MarshalError, ServiceManager};
pub use registry::{CallRegistry, Handler, HandlerError};
pub use service::{CallRequest, ClientContext, Service};
