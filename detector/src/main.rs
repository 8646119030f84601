use clap::Parser;
use detector::capture::{FixedCalibrator, LoggingInjector, SimulatedDetector};
use detector::config::ConfigStore;
use detector::control::{self, ControlState};
use detector::dispatcher::{spawn_worker, ActionQueue};
use detector::network::RelayClient;
use detector::proximity::{PeerView, ProximityEvaluator};
use log::info;
use shared::{MinimapConfig, KEY_PRESS_DELAY_MS};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay server address
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    server: String,

    /// Port for the local control API
    #[arg(short = 'p', long, default_value = "5001")]
    control_port: u16,

    /// Path to the persisted minimap region
    #[arg(short, long, default_value = "minimap_config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ConfigStore::load(args.config);
    let view = PeerView::new();
    let queue = ActionQueue::new();

    let _worker = spawn_worker(
        queue.clone(),
        Arc::new(LoggingInjector),
        Duration::from_millis(KEY_PRESS_DELAY_MS),
    );

    let evaluator = Arc::new(ProximityEvaluator::with_defaults(queue));
    let _eval_loop = evaluator.clone().spawn(view.clone());

    let detector: Arc<dyn detector::capture::PositionDetector> = Arc::new(SimulatedDetector::new());
    let calibrator = Arc::new(FixedCalibrator {
        config: MinimapConfig {
            x: 1500,
            y: 50,
            width: 300,
            height: 200,
        },
    });

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let mut relay_client = RelayClient::new(
        &args.server,
        view.clone(),
        config.clone(),
        detector.clone(),
        cmd_rx,
    )
    .await?;

    let control_state = ControlState {
        evaluator,
        config,
        detector,
        calibrator,
        relay_cmds: cmd_tx,
    };
    let listener = TcpListener::bind(("127.0.0.1", args.control_port)).await?;

    info!("Detector starting, relay at {}", args.server);

    tokio::select! {
        result = relay_client.run() => result?,
        result = control::serve(listener, control_state) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
