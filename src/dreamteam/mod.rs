pub mod agent;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod credential;
pub mod execution;
pub mod executor_agent;
pub mod http_client_pool;
pub mod llm_session;
pub mod member;
pub mod orchestrator;
pub mod registry;
pub mod render;
pub mod session;
pub mod team;
pub mod tool_protocol;
pub mod tool_protocols;
pub mod tools;
pub mod transcript;
