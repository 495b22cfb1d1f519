pub mod agent_profile;

pub use agent_profile::AgentProfile;
