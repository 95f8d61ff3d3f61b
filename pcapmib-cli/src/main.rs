//! pcapmib CLI - query a pcapmib agent
//!
//! Commands:
//! - `pcapmib get` - Exact lookups
//! - `pcapmib next` - Get-next lookup
//! - `pcapmib walk` - Walk a subtree
//! - `pcapmib table` - Show the monitor table
//! - `pcapmib status` - Get agent status

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use pcapmib_cli::{
    decode_var_bind, exception_message, format_bytes, oid_name, resolve_oid, rows_from_cells,
    truncate,
};
use pcapmib_common::{Oid, VarBind};
use pcapmib_proto::{
    GetNextRequest, GetRequest, GetResponse, GetStatusRequest, MonitorTableServiceClient,
    WalkRequest,
};
use tonic::transport::Channel;

#[derive(Parser)]
#[command(name = "pcapmib")]
#[command(about = "Query the monitor table of a pcapmib agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Agent address (host:port)
    #[arg(short, long, default_value = "localhost:9161", global = true)]
    agent: String,

    /// Base OID used to resolve and print object names
    #[arg(short, long, default_value = pcapmib_common::DEFAULT_BASE_OID, global = true)]
    base_oid: Oid,

    /// Print OIDs numerically
    #[arg(short, long, global = true)]
    numeric: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up objects exactly
    Get {
        /// OIDs or names (e.g. pcapSeenOctets.1)
        #[arg(required = true)]
        oids: Vec<String>,
    },
    /// Look up the object following an OID
    Next {
        oid: String,
    },
    /// Print every object below a root (default: the base OID)
    Walk {
        root: Option<String>,
    },
    /// Show the monitor table
    Table,
    /// Get agent status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let endpoint = format!("http://{}", cli.agent);
    let mut client = MonitorTableServiceClient::connect(endpoint)
        .await
        .context("Failed to connect to agent")?;

    match &cli.command {
        Commands::Get { oids } => {
            for arg in oids {
                let oid = resolve_oid(arg, &cli.base_oid)?;
                let response = client
                    .get(GetRequest {
                        oid: oid.clone().into_inner(),
                    })
                    .await?
                    .into_inner();
                print_response(&cli, &oid, response)?;
            }
        }
        Commands::Next { oid } => {
            let oid = resolve_oid(oid, &cli.base_oid)?;
            let response = client
                .get_next(GetNextRequest {
                    oid: oid.clone().into_inner(),
                })
                .await?
                .into_inner();
            print_response(&cli, &oid, response)?;
        }
        Commands::Walk { root } => {
            let root = match root {
                Some(root) => resolve_oid(root, &cli.base_oid)?,
                None => cli.base_oid.clone(),
            };
            let var_binds = walk(&mut client, &root).await?;
            if var_binds.is_empty() {
                println!(
                    "{} = No Such Object available on this agent at this OID",
                    display_oid(&cli, &root)
                );
            }
            for var_bind in &var_binds {
                print_var_bind(&cli, var_bind);
            }
        }
        Commands::Table => {
            let var_binds = walk(&mut client, &cli.base_oid).await?;
            show_table(&cli, &var_binds);
        }
        Commands::Status => {
            get_status(&mut client).await?;
        }
    }

    Ok(())
}

fn display_oid(cli: &Cli, oid: &Oid) -> String {
    if cli.numeric {
        oid.to_string()
    } else {
        oid_name(oid, &cli.base_oid)
    }
}

fn print_var_bind(cli: &Cli, var_bind: &VarBind) {
    println!("{} = {}", display_oid(cli, &var_bind.oid), var_bind.value);
}

fn print_response(cli: &Cli, requested: &Oid, response: GetResponse) -> Result<()> {
    match response.var_bind {
        Some(var_bind) => print_var_bind(cli, &decode_var_bind(var_bind)?),
        None => println!(
            "{} = {}",
            display_oid(cli, requested),
            exception_message(response.exception)
        ),
    }
    Ok(())
}

async fn walk(
    client: &mut MonitorTableServiceClient<Channel>,
    root: &Oid,
) -> Result<Vec<VarBind>> {
    let request = WalkRequest {
        oid: root.clone().into_inner(),
    };
    let mut stream = client.walk(request).await?.into_inner();

    let mut var_binds = Vec::new();
    while let Some(result) = stream.next().await {
        let var_bind = result.context("Walk interrupted")?;
        var_binds.push(decode_var_bind(var_bind)?);
    }
    Ok(var_binds)
}

fn show_table(cli: &Cli, var_binds: &[VarBind]) {
    let rows = rows_from_cells(var_binds, &cli.base_oid);

    if rows.is_empty() {
        println!("No monitors configured.");
        return;
    }

    println!(
        "{:>5} {:<24} {:<10} {:<30} {:>10} {:>10}",
        "INDEX", "DESCRIPTION", "DEVICE", "FILTER", "OCTETS", "PACKETS"
    );
    println!("{}", "-".repeat(94));

    for row in rows {
        println!(
            "{:>5} {:<24} {:<10} {:<30} {:>10} {:>10}",
            row.index,
            truncate(&row.description, 24),
            truncate(&row.device, 10),
            truncate(&row.filter, 30),
            format_bytes(row.seen_octets),
            row.seen_packets
        );
    }
}

async fn get_status(client: &mut MonitorTableServiceClient<Channel>) -> Result<()> {
    let response = client.get_status(GetStatusRequest {}).await?.into_inner();
    let started = chrono::Local::now() - chrono::Duration::seconds(response.uptime_seconds);

    println!("Agent Status");
    println!("{}", "-".repeat(40));
    println!("Agent:            {}", response.agent_name);
    println!("Version:          {}", response.version);
    println!(
        "Health:           {}",
        if response.healthy { "OK" } else { "UNHEALTHY" }
    );
    println!("Base OID:         {}", response.base_oid);
    println!(
        "Uptime:           {}s (since {})",
        response.uptime_seconds,
        started.format("%Y-%m-%d %H:%M:%S")
    );
    println!("Monitors:         {}", response.monitors);
    println!("Octets Seen:      {}", format_bytes(response.seen_octets));
    println!("Packets Seen:     {}", response.seen_packets);
    println!("Capture Errors:   {}", response.drain_errors);

    Ok(())
}
