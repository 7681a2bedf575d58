use std::time::Duration;

use clap::Args;
use hpx_wsengine::{
    Config, ConnectionId, Message,
    dispatch::{DispatchHandler, ShardedDispatcher},
    server::{MessageHandler, Responder, Server},
};
use tokio::{net::TcpListener, runtime, sync::watch};

/// Command line arguments for the echo server.
#[derive(Args)]
#[command(alias = "s")]
pub struct Cmd {
    /// Network address and port to listen on.
    #[arg(short, long, default_value = "127.0.0.1:9090")]
    listen: String,

    /// Largest accepted frame payload in bytes.
    #[arg(long, default_value_t = 1024 * 1024)]
    max_frame_size: usize,

    /// Largest accepted reassembled message in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    max_message_size: usize,

    /// Reject Text messages that are not valid UTF-8.
    #[arg(long)]
    check_utf8: bool,

    /// Seconds between connection open and the first ping.
    #[arg(long, default_value_t = 10)]
    initial_ping_delay: u64,

    /// Seconds between a pong and the next ping.
    #[arg(long, default_value_t = 30)]
    ping_interval: u64,

    /// Seconds to wait for a pong before closing the connection.
    #[arg(long, default_value_t = 30)]
    pong_timeout: u64,

    /// Seconds between connection count reports.
    #[arg(long, default_value_t = 60)]
    tick_interval: u64,

    /// Echo from a sharded worker pool with this many shards instead of the
    /// connection task. 0 disables the pool.
    #[arg(long, default_value_t = 0)]
    shards: usize,

    /// Queue capacity of each shard.
    #[arg(long, default_value_t = 1024)]
    shard_capacity: usize,

    /// Number of runtime worker threads. Defaults to the number of cores.
    #[arg(long)]
    threads: Option<usize>,
}

impl Cmd {
    fn config(&self) -> eyre::Result<Config> {
        let config = Config::default()
            .max_frame_size(self.max_frame_size)
            .max_message_size(self.max_message_size)
            .check_utf8(self.check_utf8)
            .initial_ping_delay(Duration::from_secs(self.initial_ping_delay))
            .ping_interval(Duration::from_secs(self.ping_interval))
            .pong_timeout(Duration::from_secs(self.pong_timeout))
            .tick_interval(Duration::from_secs(self.tick_interval));
        config.validate().map_err(|err| eyre::eyre!(err))?;
        Ok(config)
    }
}

/// Echoes on the connection task.
struct Echo;

impl MessageHandler for Echo {
    fn on_message(&self, id: ConnectionId, message: Message, responder: &Responder) {
        if let Err(err) = responder.send(message.into_frame()) {
            tracing::debug!(conn = %id, error = %err, "echo dropped");
        }
    }
}

pub fn run(cmd: Cmd) -> eyre::Result<()> {
    let config = cmd.config()?;

    let mut builder = runtime::Builder::new_multi_thread();
    if let Some(threads) = cmd.threads {
        builder.worker_threads(threads.max(1));
    }
    let runtime = builder.enable_all().build()?;
    runtime.block_on(run_async(cmd, config))
}

async fn run_async(cmd: Cmd, config: Config) -> eyre::Result<()> {
    let listener = TcpListener::bind(&cmd.listen).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("ctrl-c received"),
            Err(err) => tracing::warn!(error = %err, "failed to listen for ctrl-c"),
        }
        let _ = shutdown_tx.send(true);
    });

    if cmd.shards == 0 {
        Server::new(config, Echo).serve(listener, shutdown_rx).await?;
        return Ok(());
    }

    let dispatcher = ShardedDispatcher::new("echo", cmd.shards, cmd.shard_capacity);
    let handler = DispatchHandler::new(
        dispatcher,
        |_id: ConnectionId, message: Message, responder: Responder| async move {
            responder.send(message.into_frame())?;
            Ok::<_, hpx_wsengine::Error>(())
        },
    );
    let server = Server::new(config, handler);
    server.serve(listener, shutdown_rx).await?;

    if let Some(handler) = server.into_handler() {
        handler.into_dispatcher().shutdown().await;
    }
    Ok(())
}
