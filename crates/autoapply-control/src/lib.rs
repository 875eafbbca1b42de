pub mod auth;
pub mod poller;
pub mod request_meta;
pub mod rpc;
pub mod security;
pub mod state;
