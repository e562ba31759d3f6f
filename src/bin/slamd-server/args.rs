use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Address to listen on for both the client and monitor ports.
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))]
    pub listen: IpAddr,
    /// TCP port load-generator clients connect to.
    #[arg(long, default_value_t = 2000)]
    pub client_port: u16,
    /// TCP port resource-monitor clients connect to.
    #[arg(long, default_value_t = 2001)]
    pub monitor_port: u16,
    /// Optional YAML configuration file overriding the defaults above.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub debug: bool,
}
