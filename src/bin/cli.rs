//! CLI for recording and inspecting region states

use anyhow::Context;
use clap::{Parser, Subcommand};
use regionstore::common::Config;
use regionstore::coordinator::abort::ProcessAbort;
use regionstore::coordinator::region::{
    RegionInfo, RegionState, ServerName, State, TableDescriptor, TableName,
};
use regionstore::coordinator::state_store::NO_SEQNUM;
use regionstore::Coordinator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "regionstore")]
#[command(about = "Record and inspect region states in the catalog table")]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Number of pooled catalog connections (overrides the config file)
    #[arg(long)]
    meta_connections: Option<usize>,

    /// Do not host the catalog region in this process
    #[arg(long)]
    remote_meta: bool,

    /// Tables with serial replication (comma-separated)
    #[arg(long, value_delimiter = ',')]
    serial_tables: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a region state transition
    Record {
        /// Region as table,start_key,end_key,region_id[,replica_id]
        #[arg(long, value_parser = parse_region)]
        region: RegionInfo,

        /// New state
        #[arg(long)]
        state: State,

        /// Server the region is on (host,port,start_code)
        #[arg(long)]
        server: Option<ServerName>,

        /// Previous state
        #[arg(long)]
        prev: Option<State>,

        /// Server of the previous state
        #[arg(long)]
        prev_server: Option<ServerName>,

        /// Sequence number the region opened at
        #[arg(long, default_value_t = NO_SEQNUM, allow_negative_numbers = true)]
        seq: i64,
    },

    /// Record a split of a parent region into two daughters
    Split {
        #[arg(long, value_parser = parse_region)]
        parent: RegionInfo,

        #[arg(long, value_parser = parse_region)]
        daughter_a: RegionInfo,

        #[arg(long, value_parser = parse_region)]
        daughter_b: RegionInfo,

        #[arg(long)]
        server: ServerName,

        /// Replicas per region, primary included
        #[arg(long, default_value = "1")]
        replication: u32,
    },

    /// Record a merge of two regions
    Merge {
        #[arg(long, value_parser = parse_region)]
        merged: RegionInfo,

        #[arg(long, value_parser = parse_region)]
        region_a: RegionInfo,

        #[arg(long, value_parser = parse_region)]
        region_b: RegionInfo,

        #[arg(long)]
        server: ServerName,

        /// Replicas per region, primary included
        #[arg(long, default_value = "1")]
        replication: u32,
    },

    /// Show the catalog row of a region
    Show {
        #[arg(long, value_parser = parse_region)]
        region: RegionInfo,
    },

    /// Show the published location of the catalog region
    MetaLocation {
        #[arg(long, default_value = "0")]
        replica: u32,
    },
}

fn parse_region(s: &str) -> Result<RegionInfo, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if !(4..=5).contains(&parts.len()) || parts[0].is_empty() {
        return Err(format!(
            "expected table,start_key,end_key,region_id[,replica_id], got {:?}",
            s
        ));
    }
    let region_id = parts[3]
        .parse()
        .map_err(|_| format!("invalid region id: {}", parts[3]))?;
    let region = RegionInfo::new(TableName::new(parts[0]), parts[1], parts[2], region_id);
    match parts.get(4) {
        Some(replica) => replica
            .parse()
            .map(|r| region.with_replica(r))
            .map_err(|_| format!("invalid replica id: {}", replica)),
        None => Ok(region),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file, then override with CLI arguments
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(meta_connections) = cli.meta_connections {
        config.meta_connections = meta_connections;
    }
    if cli.remote_meta {
        config.colocated_meta = false;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let coordinator = Coordinator::open(&config, Arc::new(ProcessAbort::new()))
        .context("failed to open coordinator")?;
    for table in &cli.serial_tables {
        coordinator
            .tables()
            .add(TableDescriptor::new(TableName::new(table.as_str())).with_serial_replication(true));
    }
    coordinator.start()?;

    match cli.command {
        Commands::Record {
            region,
            state,
            server,
            prev,
            prev_server,
            seq,
        } => {
            let old = prev.map(|p| RegionState::new(region.clone(), p, prev_server));
            let new = RegionState::new(region, state, server);
            coordinator
                .state_store()
                .record_transition(&new, old.as_ref(), seq)?;
            println!("Recorded {}", new);
        }

        Commands::Split {
            parent,
            daughter_a,
            daughter_b,
            server,
            replication,
        } => {
            coordinator.state_store().record_split(
                &parent,
                &daughter_a,
                &daughter_b,
                &server,
                replication,
            )?;
            println!("Recorded split of {}", parent);
        }

        Commands::Merge {
            merged,
            region_a,
            region_b,
            server,
            replication,
        } => {
            coordinator.state_store().record_merge(
                &merged,
                &region_a,
                &region_b,
                &server,
                replication,
            )?;
            println!("Recorded merge into {}", merged);
        }

        Commands::Show { region } => match coordinator.catalog().get_row(&region.catalog_row_key())? {
            None => println!("No catalog row for {}", region),
            Some(row) => {
                let replica = region.replica_id();
                println!("Region: {}", region);
                println!("  State: {}", row.region_state(replica)?);
                match row.region_server(replica)? {
                    Some(server) => println!("  Server: {}", server),
                    None => println!("  Server: -"),
                }
                if let Some(seq) = row.open_seq_num(replica)? {
                    println!("  Open seqnum: {}", seq);
                }
                if let Some(info) = row.region_info()? {
                    println!("  Offline: {}, split: {}", info.is_offline(), info.is_split());
                }
            }
        },

        Commands::MetaLocation { replica } => {
            match coordinator.meta_locations().get_meta_location(replica)? {
                None => println!("No location published for catalog replica {}", replica),
                Some(location) => {
                    match location.server {
                        Some(server) => println!("Server: {}", server),
                        None => println!("Server: -"),
                    }
                    println!("State: {}", location.state);
                }
            }
        }
    }

    coordinator.stop()?;
    Ok(())
}
