//! # 代理模块
//!
//! 逐请求的代理管道及其组件

pub mod body;
pub mod context;
pub mod credential;
pub mod forwarder;
pub mod inspection;
pub mod pipeline;
pub mod rate_limit;
pub mod response;
pub mod sanitizer;
pub mod server;
pub mod target;

pub use body::{BodyEncoding, ParsedBody, PreparedBody, reserialize};
pub use context::{IncomingRequest, OutboundRequest, RequestStage, RouteDecision};
pub use credential::{CredentialInjector, CredentialMatch};
pub use forwarder::UpstreamClient;
pub use pipeline::ProxyDispatcher;
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use response::ResponseRewriter;
pub use sanitizer::HeaderSanitizer;
pub use server::{ProxyServer, create_router};
pub use target::{TargetResolver, TargetUrl};
