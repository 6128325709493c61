use std::net::SocketAddr;

use clap::Parser;

use crate::{
    codec::DEFAULT_MAX_LINE_LENGTH,
    config::{DEFAULT_LISTEN, DEFAULT_QUEUE_CAPACITY, ServerConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Capacity of the queue shared by all client read loops.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, value_parser = parse_capacity)]
    pub inbound_capacity: usize,

    /// Capacity of the queue feeding the downstream processor.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, value_parser = parse_capacity)]
    pub downstream_capacity: usize,

    /// Longest line, in bytes, accepted from a client; longer lines are dropped.
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH, value_parser = parse_capacity)]
    pub max_line_length: usize,
}

fn parse_capacity(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("value must be at least 1".to_string()),
        Ok(capacity) => Ok(capacity),
        Err(err) => Err(err.to_string()),
    }
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            listen: cli.listen,
            inbound_capacity: cli.inbound_capacity,
            downstream_capacity: cli.downstream_capacity,
            max_line_length: cli.max_line_length,
        }
    }
}
