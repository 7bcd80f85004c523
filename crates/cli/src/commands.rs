//! CLI commands.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use anyhow::{bail, Context};
use clap::Subcommand;
use corelib::{ConnectionId, NodeId};
use mesh::testing::{settle, MemoryNetwork};
use mesh::{LocalNode, MeshConfig, PacketConnection, PeerCallbacks, RemotePeer};

const ALPHA: NodeId = NodeId(0xa1);
const BETA: NodeId = NodeId(0xb2);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run two nodes over an in-memory network and swap their link
    Simulate {
        /// Packets to exchange before and after the swap
        #[arg(long, default_value_t = 3)]
        messages: usize,
    },
    /// Print the effective node configuration as JSON
    Config,
}

impl Command {
    pub fn execute(&self, config: &MeshConfig) -> anyhow::Result<CommandResult> {
        match self {
            Command::Simulate { messages } => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                let local = tokio::task::LocalSet::new();
                let report = runtime.block_on(local.run_until(simulate(config, *messages)))?;
                Ok(CommandResult::Simulation(report))
            }
            Command::Config => Ok(CommandResult::Config(serde_json::to_string_pretty(config)?)),
        }
    }
}

/// Output of a command.
#[derive(Debug)]
pub enum CommandResult {
    Simulation(SimulationReport),
    Config(String),
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Simulation(report) => report.fmt(f),
            CommandResult::Config(json) => f.write_str(json),
        }
    }
}

/// What happened to the simulated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    pub connection: ConnectionId,
    /// Packets delivered in both directions.
    pub delivered: usize,
    pub generation_before: u64,
    pub generation_after: u64,
    /// Whether the node still hands out the handle the application holds.
    pub same_handle: bool,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "connection   {}", self.connection)?;
        writeln!(f, "delivered    {}", self.delivered)?;
        writeln!(
            f,
            "link         generation {} -> {}",
            self.generation_before, self.generation_after
        )?;
        write!(
            f,
            "handle       {}",
            if self.same_handle { "unchanged" } else { "replaced" }
        )
    }
}

fn announce(name: &'static str) -> PeerCallbacks<impl Fn(&RemotePeer), impl Fn(&RemotePeer)> {
    PeerCallbacks::new(
        move |peer: &RemotePeer| tracing::info!(node = name, peer = %peer.node(), "peer discovered"),
        move |peer: &RemotePeer| tracing::info!(node = name, peer = %peer.node(), "peer removed"),
    )
}

/// Connect alpha to beta, exchange packets, improve the route, exchange again.
pub async fn simulate(config: &MeshConfig, messages: usize) -> anyhow::Result<SimulationReport> {
    let network = MemoryNetwork::new();
    let alpha = LocalNode::new(network.router(ALPHA), config.clone())?;
    let beta = LocalNode::new(network.router(BETA), config.clone())?;
    network.link(ALPHA, BETA);

    let accepted: Rc<RefCell<Vec<PacketConnection>>> = Rc::default();
    let inbox = Rc::clone(&accepted);
    alpha.start(announce("alpha"))?;
    beta.start_with_handler(announce("beta"), move |conn: PacketConnection| {
        inbox.borrow_mut().push(conn)
    })?;

    let peer = alpha.peer(BETA).context("beta was not discovered")?;
    let outbound = alpha.connect(&[peer])?;
    outbound.wait_active().await?;
    settle().await;
    let inbound = accepted
        .borrow()
        .first()
        .cloned()
        .context("beta did not accept the connection")?;

    let generation_before = outbound.link_generation();
    let mut delivered = exchange(&outbound, &inbound, messages).await?;

    network.improve_route(ALPHA, BETA);
    settle().await;
    outbound.wait_active().await?;
    delivered += exchange(&outbound, &inbound, messages).await?;

    let same_handle = alpha
        .connection(&outbound.id())
        .is_some_and(|held| PacketConnection::ptr_eq(&held, &outbound));
    let report = SimulationReport {
        connection: outbound.id(),
        delivered,
        generation_before,
        generation_after: outbound.link_generation(),
        same_handle,
    };

    alpha.stop();
    beta.stop();
    Ok(report)
}

/// Send `count` packets from `from` and have `to` echo each one back.
async fn exchange(
    from: &PacketConnection,
    to: &PacketConnection,
    count: usize,
) -> anyhow::Result<usize> {
    for i in 0..count {
        let payload = format!("packet {i}");
        from.send(payload.as_bytes()).await?;
        let received = to.recv().await?;
        if received != payload.as_bytes() {
            bail!("packet {i} arrived corrupted");
        }
        to.send(&received).await?;
        let echoed = from.recv().await?;
        if echoed != received {
            bail!("echo of packet {i} arrived corrupted");
        }
    }
    Ok(count * 2)
}
