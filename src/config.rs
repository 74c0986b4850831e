use clap::Parser;

use crate::server::hub::SEND_BUF;

/// Real-time chat broadcast hub
#[derive(Parser, Clone, Debug)]
#[command(name = "server", version, about = "Chat hub WebSocket server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path the WebSocket upgrade is served on
    #[arg(long, env = "WS_PATH", default_value = "/ws")]
    pub ws_path: String,

    /// Directory holding index.html and static assets
    #[arg(long, env = "WEB_DIR", default_value = "web")]
    pub web_dir: String,

    /// Public URL of this deployment; enables the self-ping keep-alive
    #[arg(long, env = "APP_URL")]
    pub app_url: Option<String>,

    /// Seconds between keep-alive pings
    #[arg(long, env = "KEEPALIVE_SECS", default_value_t = 840)]
    pub keepalive_secs: u64,

    /// Outbound queue depth per connection before a client counts as too slow
    #[arg(long, env = "SEND_BUFFER", default_value_t = SEND_BUF)]
    pub send_buffer: usize,

    /// Enable structured JSON logging
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            ws_path: "/ws".to_string(),
            web_dir: "web".to_string(),
            app_url: None,
            keepalive_secs: 840,
            send_buffer: SEND_BUF,
            json_logs: false,
        }
    }
}
