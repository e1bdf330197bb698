//! Deployment specific [`ClientWrapper`](crate::client_wrapper::ClientWrapper) implementations.

pub mod azure_openai;
