//! Montana Finality CLI
//!
//! `simulate`: локальная сеть из N участников и одного агрегатора.
//! `calibrate`: скорость delay proof на этой машине.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args as ClapArgs, Parser, Subcommand};
use montana_finality::{
    CheckpointStore, Clock, DelayProofEngine, DilithiumVerifier, FinalityConfig, FinalityEngine,
    Keypair, MemoryStore, Participant, StaticRegionMap, Storage, SystemClock, boundary_to_string,
    participant, short_hex,
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "montana-finality", version, about = "Montana temporal finality core")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a local multi-participant simulation
    Simulate(SimulateArgs),
    /// Measure delay proof speed
    Calibrate {
        #[arg(long, default_value = "1024")]
        discriminant_bits: u32,
        #[arg(long, default_value = "10000")]
        iterations: u64,
    },
}

#[derive(ClapArgs)]
struct SimulateArgs {
    /// Number of participants
    #[arg(short, long, default_value = "7")]
    participants: usize,

    /// Required delay proof iterations for the first heartbeat of an epoch
    #[arg(short, long, default_value = "2000")]
    iterations: u64,

    /// Window length in seconds
    #[arg(long, default_value = "10")]
    interval_secs: u64,

    /// Stop after this many checkpoints
    #[arg(short, long, default_value = "5")]
    windows: usize,

    /// Distinct regions participants are spread over
    #[arg(long, default_value = "3")]
    regions: u16,

    /// Discriminant size for delay proofs
    #[arg(long, default_value = "256")]
    discriminant_bits: u32,

    /// Sled directory; in-memory storage when absent
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("montana_finality=info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Simulate(sim) => simulate(sim).await,
        Command::Calibrate { discriminant_bits, iterations } => {
            let engine = DelayProofEngine::new(discriminant_bits, 128, iterations.max(1));
            match tokio::task::spawn_blocking(move || engine.calibrate(iterations)).await {
                Ok(Ok(rate)) => info!("{}-bit discriminant: {:.0} squarings/sec", discriminant_bits, rate),
                Ok(Err(e)) => error!("Calibration failed: {}", e),
                Err(e) => error!("Calibration task failed: {}", e),
            }
        }
    }
}

async fn simulate(args: SimulateArgs) {
    let mut config = FinalityConfig {
        interval_ms: args.interval_secs.saturating_mul(1_000),
        discriminant_bits: args.discriminant_bits,
        base_iterations: args.iterations,
        ..FinalityConfig::default()
    };
    config.tolerance_ms = config.tolerance_ms.min(config.interval_ms / 4);
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return;
    }

    let store: Arc<dyn CheckpointStore> = match &args.data_dir {
        Some(dir) => match Storage::open(dir) {
            Ok(storage) => Arc::new(storage),
            Err(e) => {
                error!("Failed to open storage at {}: {}", dir.display(), e);
                return;
            }
        },
        None => Arc::new(MemoryStore::new()),
    };

    let keys: Vec<Arc<Keypair>> = (0..args.participants).map(|_| Arc::new(Keypair::generate())).collect();
    let regions: StaticRegionMap = keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.public.clone(), (i % usize::from(args.regions.max(1))) as u16))
        .collect();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = match FinalityEngine::restore(config.clone(), clock.clone(), Arc::new(DilithiumVerifier), store) {
        Ok(engine) => Arc::new(engine.with_regions(Arc::new(regions))),
        Err(e) => {
            error!("Failed to start engine: {}", e);
            return;
        }
    };

    info!(
        "Simulating {} participants, {} iterations, {}s windows, {}-bit discriminant",
        args.participants, args.iterations, args.interval_secs, args.discriminant_bits
    );

    let (heartbeat_tx, heartbeat_rx) = mpsc::channel(args.participants.max(1) * 4);
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut checkpoints = engine.subscribe();

    let engine_task = tokio::spawn(Arc::clone(&engine).run(heartbeat_rx, stop_rx.clone()));
    let mut participant_tasks = Vec::new();
    for key in &keys {
        let p = Participant::new(key.clone(), &config, args.iterations);
        participant_tasks.push(tokio::spawn(participant::run(
            p,
            clock.clone(),
            heartbeat_tx.clone(),
            stop_rx.clone(),
        )));
    }
    drop(heartbeat_tx);

    info!("Press Ctrl+C to stop.");
    let mut seen = 0usize;
    tokio::select! {
        _ = async {
            while seen < args.windows {
                match checkpoints.recv().await {
                    Ok(cp) => {
                        seen += 1;
                        let confidence = engine.get_confidence(&cp).await;
                        info!(
                            "#{} {} | {} participants | confidence {} | {}",
                            seen,
                            boundary_to_string(cp.boundary_timestamp),
                            cp.participant_count,
                            confidence,
                            short_hex(&cp.hash())
                        );
                        let first = engine.canonical_chain().await.first().map(|c| c.boundary_timestamp);
                        if let Some(first) = first {
                            if let Ok(tier) = engine.get_finality_tier(first).await {
                                info!("  {} is {}", boundary_to_string(first), tier);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!("Skipped {} checkpoint events", n),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    let _ = stop_tx.send(true);
    for task in participant_tasks {
        let _ = task.await;
    }
    let _ = engine_task.await;

    for (i, (id, score)) in engine.ranking().await.into_iter().take(5).enumerate() {
        info!("Top {}: {} score {:.3}", i + 1, short_hex(&id), score);
    }
    info!("Shutting down...");
}
