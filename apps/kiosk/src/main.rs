mod commands;
mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiosk_core::{
    find_frame, select_transport, CaptureOutcome, ControllerDeps, DeviceApi, DurableState,
    HeartbeatReporter, HttpTransport, KioskController, MemoryState, PaymentGateway,
    PaymentInitiation, RecoveryPath, RetakeOutcome, TokioScheduler,
};
use shared::{domain::OptionsPatch, error::KioskResult};
use storage::Storage;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast::error::RecvError, mpsc},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    commands::{parse_command, Command, HELP},
    config::{load_settings, Settings},
};

#[derive(Parser, Debug)]
#[command(name = "kiosk", about = "Walk-up photo kiosk session controller")]
struct Cli {
    /// Path to the kiosk config file (defaults to ./kiosk.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Run the kiosk flow from console commands.
    Run,
    /// Check the device service and the state database, then exit.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command.unwrap_or(Mode::Run) {
        Mode::Run => run(settings).await,
        Mode::Check => check(settings).await,
    }
}

async fn check(settings: Settings) -> Result<()> {
    let transport = select_transport(
        settings.bridge_url.as_deref(),
        &settings.device_url,
        settings.request_timeout(),
    )
    .context("failed to build device transport")?;
    let status = DeviceApi::new(transport)
        .status()
        .await
        .context("device status check failed")?;
    println!(
        "device: {} (camera {})",
        status.status,
        if status.camera { "ready" } else { "offline" }
    );
    open_storage(&settings.database_url).await?;
    println!("state: {}", settings.database_url);
    Ok(())
}

async fn open_storage(database_url: &str) -> Result<Storage> {
    let storage = Storage::new(database_url)
        .await
        .with_context(|| format!("failed to open '{database_url}'"))?;
    storage.health_check().await?;
    Ok(storage)
}

async fn open_store(database_url: &str) -> Arc<dyn DurableState> {
    match open_storage(database_url).await {
        Ok(storage) => {
            info!(database_url, "kiosk: durable state opened");
            Arc::new(storage)
        }
        Err(err) => {
            warn!(database_url, error = %format!("{err:#}"), "kiosk: durable state unavailable; counters will not survive a restart");
            Arc::new(MemoryState::new())
        }
    }
}

async fn run(settings: Settings) -> Result<()> {
    let device_transport = select_transport(
        settings.bridge_url.as_deref(),
        &settings.device_url,
        settings.request_timeout(),
    )
    .context("failed to build device transport")?;
    let host_transport = Arc::new(
        HttpTransport::new(&settings.payment_url, settings.request_timeout())
            .context("failed to build payment host client")?,
    );

    let device = DeviceApi::new(device_transport);
    let mut controller = KioskController::initialize(ControllerDeps {
        device: device.clone(),
        gateway: PaymentGateway::new(host_transport.clone(), settings.price_per_copy),
        store: open_store(&settings.database_url).await,
        scheduler: Arc::new(TokioScheduler),
        timings: settings.timings.clone(),
        capture_policy: settings.capture_policy,
        default_copies: settings.default_copies,
        redirect_url: settings.redirect_url.clone(),
    })
    .await;

    let shutdown = CancellationToken::new();
    let heartbeat = HeartbeatReporter::new(
        host_transport,
        device,
        settings.kiosk_id.clone(),
        env!("CARGO_PKG_VERSION"),
        settings.heartbeat_interval(),
    )
    .spawn(controller.subscribe_phase(), shutdown.clone());

    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("event: {line}"),
                    Err(err) => warn!(error = %err, "kiosk: event not printable"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "kiosk: event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let cancel = controller.cancellation_handle();
    {
        let cancel = cancel.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("kiosk: interrupt received");
                cancel.cancel();
                shutdown.cancel();
            }
        });
    }

    // stdin is read on its own task so `exit` can interrupt a running
    // capture or payment poll
    let (tx, mut rx) = mpsc::channel::<Command>(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Ok(command) => {
                    if matches!(command, Command::Exit | Command::Quit) {
                        cancel.cancel();
                    }
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                Err(message) => println!("{message}"),
            }
        }
    });

    info!(kiosk_id = %settings.kiosk_id, phase = %controller.phase(), "kiosk: ready");
    println!("{HELP}");

    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        if command == Command::Quit {
            break;
        }
        if let Err(err) = dispatch(&mut controller, command).await {
            println!("error: {err}");
        }
    }

    controller.operator_exit().await;
    shutdown.cancel();
    heartbeat.await.context("heartbeat task failed")?;
    info!("kiosk: stopped");
    Ok(())
}

async fn dispatch(controller: &mut KioskController, command: Command) -> KioskResult<()> {
    match command {
        Command::Start => {
            let session_id = controller.start_session().await?;
            println!("session {session_id} started; total {}", controller.payment_amount());
        }
        Command::Copies(copies) => {
            let copies = controller.set_copies(copies).await?;
            println!("{copies} copies; total {}", controller.payment_amount());
        }
        Command::Pay => match controller.begin_payment().await? {
            PaymentInitiation::Redirect(order) => {
                println!("pay at {} (amount {})", order.payment_url, order.amount);
                if let Some(order_id) = order.order_id {
                    println!("order {order_id}");
                }
            }
            PaymentInitiation::Failed { message, recovery } => {
                println!("payment failed: {message}");
                recover(controller, recovery).await?;
            }
            PaymentInitiation::Blocked(recovery) => recover(controller, recovery).await?,
        },
        Command::Verify(transaction_id) => {
            let outcome = controller.verify_payment(transaction_id).await?;
            println!(
                "payment {:?} after {} checks",
                outcome.state, outcome.attempts
            );
            if let Some(err) = outcome.as_error() {
                println!("{err}");
                let recovery = controller.payment_recovery();
                recover(controller, recovery).await?;
            }
        }
        Command::Filter(filter) => {
            let options = controller
                .update_options(OptionsPatch {
                    filter: Some(filter),
                    frame: None,
                })
                .await?;
            println!("filter {}", options.filter.as_wire());
        }
        Command::Frame(frame) => {
            let options = controller
                .update_options(OptionsPatch {
                    filter: None,
                    frame: Some(frame),
                })
                .await?;
            match find_frame(&options.frame) {
                Some(template) => println!("frame {} ({})", template.id, template.name),
                None => println!("frame {}", options.frame),
            }
        }
        Command::Layout => {
            for (index, slot) in controller.frame_layout().await.iter().enumerate() {
                println!(
                    "slot {index}: top {:.1}% left {:.1}% {:.1}% x {:.1}%",
                    slot.top, slot.left, slot.width, slot.height
                );
            }
        }
        Command::Continue => {
            controller.continue_to_capture()?;
            capture(controller).await?;
        }
        Command::RetryShot => capture(controller).await?,
        Command::Preview => println!("strip {}", controller.preview_strip().await?),
        Command::Print => {
            controller.print_now().await?;
            println!("printing {} copies", controller.session().copies());
            controller.await_print_completion().await?;
            println!("thank you");
        }
        Command::Retake => match controller.retake().await? {
            RetakeOutcome::Restarted { session_id } => println!("retake: session {session_id}"),
            RetakeOutcome::Exhausted => println!("retake already used"),
        },
        Command::Status => match serde_json::to_string_pretty(&controller.view()) {
            Ok(view) => println!("{view}"),
            Err(err) => warn!(error = %err, "kiosk: session view not printable"),
        },
        Command::Exit => controller.operator_exit().await,
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

async fn capture(controller: &mut KioskController) -> KioskResult<()> {
    match controller.run_capture().await? {
        CaptureOutcome::Finished => println!("review your photos"),
        CaptureOutcome::Stalled { shot_index, error } => {
            println!("shot {} failed: {error}; type retry-shot", shot_index + 1)
        }
    }
    Ok(())
}

async fn recover(controller: &mut KioskController, recovery: RecoveryPath) -> KioskResult<()> {
    match recovery {
        RecoveryPath::Retry { remaining_attempts } => {
            println!("{remaining_attempts} attempts left");
        }
        RecoveryPath::ReturnToIdle { after } => {
            println!("returning to start in {}s", after.as_secs());
            controller.await_failure_recovery().await?;
        }
    }
    Ok(())
}
