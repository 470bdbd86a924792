mod console;
mod core;
mod surface;

use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tv_core::config::Config;
use tv_core::protocol::Broadcast;

/// Tracing layer that mirrors warnings and errors onto the broadcast channel.
struct BroadcastLayer {
    sender: broadcast::Sender<Broadcast>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));
        let _ = self.sender.send(Broadcast::Log { message });
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (broadcast_tx, broadcast_rx) = broadcast::channel::<Broadcast>(256);

    // Log to a file; stdout carries the JSON broadcasts.
    let data_dir = tv_core::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("tvzap.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(BroadcastLayer {
            sender: broadcast_tx.clone(),
        })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("debug,hyper_util=warn,reqwest=warn,hyper=warn")
            }),
        )
        .init();
    eprintln!("tvzap: logging to {}", log_path.display());

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    info!("Channel list: {}", config.catalog.source);

    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::SessionEvent>(256);

    let session = core::SessionCore::new(
        config,
        Box::new(surface::LogSurface::new()),
        event_tx.clone(),
        broadcast_tx,
    )?;

    let _writer = console::start_writer(broadcast_rx);
    let _reader = console::start_reader(event_tx);

    session.run(event_rx).await
}
