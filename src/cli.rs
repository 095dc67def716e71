use clap::{Parser, Subcommand};

/// Claude Gateway: multi-channel LLM proxy with protocol translation
#[derive(Parser)]
#[command(name = "claude-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind (defaults to SERVER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage upstream channels
    Channel {
        #[command(subcommand)]
        command: ChannelCommands,
    },

    /// Manage display-model mappings
    Mapping {
        #[command(subcommand)]
        command: MappingCommands,
    },
}

#[derive(Subcommand)]
pub enum ChannelCommands {
    /// Register a new upstream channel
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        api_key: String,
        /// `anthropic`, or anything else for an OpenAI-compatible endpoint
        #[arg(long, default_value = "anthropic")]
        provider: String,
        /// Higher is tried first
        #[arg(long, default_value_t = 0)]
        priority: i64,
        /// Per-attempt timeout in seconds (0 = gateway default)
        #[arg(long, default_value_t = 120)]
        timeout: i64,
        /// Create the channel disabled
        #[arg(long)]
        inactive: bool,
    },
    /// List channels
    List {
        /// Only active channels
        #[arg(long)]
        active: bool,
    },
}

#[derive(Subcommand)]
pub enum MappingCommands {
    /// Map a display model onto a channel's upstream model
    Add {
        #[arg(long)]
        channel_id: i64,
        #[arg(long)]
        upstream_model: String,
        #[arg(long)]
        display_model: String,
        /// Create the mapping disabled
        #[arg(long)]
        disabled: bool,
    },
    /// List all mappings
    List,
}
