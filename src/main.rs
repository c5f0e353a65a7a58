//! dnsprobe - one-shot DNS queries over any transport
//!
//! Diagnostic CLI around the library facade: performs a single query against
//! the given server and prints the same JSON document the C ABI returns.

use anyhow::Result;
use clap::Parser;

use dnsprobe::client::{execute, QueryRequest};
use dnsprobe::render::render;

#[derive(Parser)]
#[command(name = "dnsprobe")]
#[command(version)]
#[command(about = "One-shot DNS queries over UDP, TCP, DoT, DoH, DoQ and DoH3", long_about = None)]
struct Cli {
    /// Question name to resolve
    qname: String,

    /// Server address; the scheme selects the transport, e.g. 8.8.8.8:53,
    /// tcp://1.1.1.1:53, tls://1.1.1.1:853, https://dns.google/dns-query,
    /// quic://94.140.14.14:853, https3://dns.google/dns-query
    #[arg(short, long)]
    server: String,

    /// Record type mnemonic
    #[arg(long, default_value = "A")]
    qtype: String,

    /// Record class mnemonic
    #[arg(long, default_value = "IN")]
    qclass: String,

    /// SOCKS5 proxy, host:port or socks5://host:port
    #[arg(long)]
    socks5: Option<String>,

    /// Explicit TLS server name (SNI) override
    #[arg(long)]
    sni: Option<String>,

    /// EDNS(0) client subnet in CIDR form, e.g. 1.2.3.0/24
    #[arg(long)]
    client_subnet: Option<String>,

    /// DoH/DoH3 request method
    #[arg(long, value_parser = ["post", "get"], default_value = "post")]
    method: String,

    /// Enable verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let request = QueryRequest {
        server: cli.server,
        qname: cli.qname,
        qtype: cli.qtype,
        qclass: cli.qclass,
        socks5: cli.socks5,
        sni: cli.sni,
        client_subnet: cli.client_subnet,
        http_method: Some(cli.method),
    };

    println!("{}", render(execute(&request).await));
    Ok(())
}
