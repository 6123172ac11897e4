//! Proxy orchestration: configuration, lifecycle, background tasks and dispatch
pub mod config;
pub mod error;
pub mod proxy;
pub mod self_address;
pub mod supervisor;

pub use config::{ConfigError, ProxyConfig, SelfRegistration};
pub use error::{ProxyError, ProxyResult};
pub use proxy::{
    ColorProxy, Dispatch, Heartbeat, ProxyComponents, ProxyState, RegisterRoute,
    ROUTE_SWEEP_TASK, SELF_HEARTBEAT_TASK,
};
pub use self_address::{is_full_url, resolve_self_address, SelfAddressError};
pub use supervisor::TaskSupervisor;
