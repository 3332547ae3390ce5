mod settings;

pub use settings::{
    ApiConfig, JwtConfig, OtelConfig, PendingQueueConfig, ServerConfig, Settings, WebSocketConfig,
};
