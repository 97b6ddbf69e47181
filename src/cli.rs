use clap::Parser;
use lsp_peer::lsp::log::DEFAULT_TRUNCATE_AT;
use lsp_peer::lsp::peer::DEFAULT_MAX_CONTENT_LENGTH;
use lsp_peer::{LogConfig, PeerConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub peer: PeerConfig,
    pub server_name: String,
}

#[derive(Parser, Debug)]
#[command(name = "lsp_peer")]
#[command(about = "Serve JSON-RPC 2.0 over stdio with LSP Content-Length framing", long_about = None)]
pub struct Cli {
    /// Log message payloads in full instead of truncating them
    #[arg(long)]
    full_payloads: bool,
    /// Characters of payload kept in log lines
    #[arg(long, default_value_t = DEFAULT_TRUNCATE_AT)]
    truncate_at: usize,
    /// Largest accepted message body in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_CONTENT_LENGTH)]
    max_content_length: usize,
    /// Name reported in the initialize result
    #[arg(long, default_value = "lsp_peer")]
    server_name: String,
}

impl Cli {
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn into_config(self) -> Config {
        Config {
            peer: PeerConfig {
                log: LogConfig {
                    full_payloads: self.full_payloads,
                    truncate_at: self.truncate_at,
                },
                max_content_length: self.max_content_length,
            },
            server_name: self.server_name,
        }
    }
}
