use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Address of the slamd server to connect to.
    #[arg(short, long, default_value = "127.0.0.1")]
    pub slamd_address: String,
    /// TCP port the server's client listener is bound to.
    #[arg(short = 'p', long, default_value_t = 2000)]
    pub client_port: u16,
    /// Identifier the server should associate with this client.
    #[arg(short, long, default_value = "anonymous")]
    pub auth_id: String,
    /// Optional credential sent alongside the auth id.
    #[arg(long)]
    pub auth_credential: Option<String>,
    /// Client identifier reported in the Hello handshake.
    #[arg(long, default_value = "slamd-client")]
    pub client_id: String,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub debug: bool,
}
