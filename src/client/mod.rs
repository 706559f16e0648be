pub mod config;
pub mod session;
pub mod events;

pub use config::{config_path, ClientConfig};
pub use session::{ClientBuilder, OverlayClient};
pub use events::{DisconnectReason, EventCollector, EventHandler, GameEvent};
