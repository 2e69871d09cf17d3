//! The API layer, containing web handlers and routing.

pub mod admin;
pub mod handlers;
pub mod router;
pub mod signature;

pub use admin::{
    BatchResponse, BlocklistResponse, ClearBlocklistResponse, ListBlocklistResponse,
    clear_blocklist_handler, get_batch_handler, get_config_handler, list_blocklist_handler,
    list_history_handler, remove_blocklist_handler,
};
pub use handlers::ApiDoc;
pub use router::{RateLimitConfig, create_router, create_router_with_rate_limit};
