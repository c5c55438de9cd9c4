//! Terminal front-end: drives `Pipeline` over a live interface or a replayed
//! capture file and renders a periodically-refreshed scoreboard.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use meter::{Mode, NameRegistry, PartyRegistry, Pipeline, PipelineSnapshot, SessionMeter};
use native::{LiveCapture, LiveCaptureConfig, PacketSource, ReplayCapture};
use serde_json::json;
use tabled::{builder::Builder, settings::Style};

#[derive(Debug, Parser)]
#[command(name = "albion-dps-meter", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture Photon traffic from a live network interface.
    Live {
        #[command(flatten)]
        common: CommonArgs,

        /// Network interface to capture on.
        #[arg(long)]
        interface: Option<String>,

        /// Print available capture interfaces and exit.
        #[arg(long)]
        list_interfaces: bool,

        /// BPF filter applied to the capture.
        #[arg(long, default_value = "udp and (port 5055 or port 5056 or port 5058)")]
        bpf: String,

        /// Maximum bytes captured per packet.
        #[arg(long, default_value_t = 65535)]
        snaplen: i32,

        /// Enable promiscuous mode.
        #[arg(long)]
        promisc: bool,

        /// Read timeout in milliseconds.
        #[arg(long, default_value_t = 1000)]
        timeout_ms: i32,
    },
    /// Replay a previously captured pcap file.
    Replay {
        #[command(flatten)]
        common: CommonArgs,

        /// Path to a pcap/pcapng capture file.
        pcap: PathBuf,
    },
}

#[derive(Debug, clap::Args)]
struct CommonArgs {
    /// Column to sort the scoreboard by.
    #[arg(long, value_enum, default_value_t = SortKey::Dps)]
    sort: SortKey,

    /// Number of rows to show in the scoreboard.
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Session boundary: a battle, a zone, or a manually toggled window.
    #[arg(long, value_enum, default_value_t = MeterMode::Battle)]
    mode: MeterMode,

    /// Number of completed sessions retained in history.
    #[arg(long, default_value_t = 5)]
    history: usize,

    /// Seconds of inactivity before a battle-mode session closes.
    #[arg(long, default_value_t = 20.0)]
    battle_timeout: f64,

    /// Override the locally-controlled character's name.
    #[arg(long, env = "SELF_NAME")]
    self_name: Option<String>,

    /// Override the locally-controlled character's entity id.
    #[arg(long, env = "SELF_ID")]
    self_id: Option<i32>,

    /// Render each snapshot as a table, or dump it as one JSON object per line.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortKey {
    Dmg,
    Dps,
    Heal,
    Hps,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MeterMode {
    Battle,
    Zone,
    Manual,
}

impl From<MeterMode> for Mode {
    fn from(value: MeterMode) -> Self {
        match value {
            MeterMode::Battle => Mode::Battle,
            MeterMode::Zone => Mode::Zone,
            MeterMode::Manual => Mode::Manual,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Live {
            common,
            interface,
            list_interfaces,
            bpf,
            snaplen,
            promisc,
            timeout_ms,
        } => {
            if list_interfaces {
                for interface in LiveCapture::list_interfaces()? {
                    println!("{interface}");
                }
                return Ok(());
            }
            let interface = interface.context("--interface is required (or pass --list-interfaces)")?;
            let config = LiveCaptureConfig {
                interface,
                bpf_filter: bpf,
                snaplen,
                promisc,
                timeout_ms,
            };
            log::info!("starting live capture on configured interface");
            let source = LiveCapture::open(&config)?;
            run(source, common)
        }
        Command::Replay { common, pcap } => {
            log::info!("replaying capture file {}", pcap.display());
            let source = ReplayCapture::open(&pcap)?;
            run(source, common)
        }
    }
}

fn run(mut source: impl PacketSource, common: CommonArgs) -> Result<()> {
    let names = NameRegistry::new();
    let mut party = PartyRegistry::new(true);
    if let Some(self_name) = &common.self_name {
        party.set_self_name(self_name, true);
    }
    if let Some(self_id) = common.self_id {
        party.seed_self_ids([self_id]);
    }

    let mut meter = SessionMeter::new(10.0, common.battle_timeout, common.history.max(1));
    meter.set_mode(common.mode.into());
    let mut pipeline = Pipeline::new(meter, 1.0)
        .with_name_registry(names)
        .with_party_registry(party);

    while let Some(packet) = source.next_packet() {
        if let Some(snapshot) = pipeline.process_packet(&packet) {
            render_snapshot(&snapshot, &common);
        }
    }
    let final_snapshot = pipeline.finalize();
    render_snapshot(&final_snapshot, &common);
    Ok(())
}

fn render_snapshot(snapshot: &PipelineSnapshot, common: &CommonArgs) {
    let names = snapshot.names.clone().unwrap_or_default();
    let mut rows: Vec<(String, f64, f64, f64, f64)> = snapshot
        .totals
        .iter()
        .map(|(source_id, totals)| {
            let label = names.get(source_id).cloned().unwrap_or_else(|| source_id.to_string());
            (label, totals.damage, totals.dps, totals.heal, totals.hps)
        })
        .collect();

    rows.sort_by(|a, b| {
        let (ka, kb) = match common.sort {
            SortKey::Dmg => (a.1, b.1),
            SortKey::Dps => (a.2, b.2),
            SortKey::Heal => (a.3, b.3),
            SortKey::Hps => (a.4, b.4),
        };
        kb.partial_cmp(&ka).unwrap_or(std::cmp::Ordering::Equal)
    });
    rows.truncate(common.top);

    match common.format {
        OutputFormat::Table => {
            let mut builder = Builder::default();
            builder.push_record(["Name", "Damage", "DPS", "Heal", "HPS"]);
            for (label, damage, dps, heal, hps) in &rows {
                builder.push_record([
                    label.clone(),
                    format!("{damage:.0}"),
                    format!("{dps:.1}"),
                    format!("{heal:.0}"),
                    format!("{hps:.1}"),
                ]);
            }
            let mut table = builder.build();
            table.with(Style::rounded());
            println!("{table}");
        }
        OutputFormat::Json => {
            let entries: Vec<_> = rows
                .iter()
                .map(|(label, damage, dps, heal, hps)| {
                    json!({ "name": label, "damage": damage, "dps": dps, "heal": heal, "hps": hps })
                })
                .collect();
            let doc = json!({ "timestamp": snapshot.timestamp, "entries": entries });
            println!("{doc}");
        }
    }
}

