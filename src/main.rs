use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::broadcast;

use cueflow::config::{sanitize_config, Config};
use cueflow::engine::clock_worker::ClockWorkerFactory;
use cueflow::engine::Scheduler;
use cueflow::playlist::MediaItem;
use cueflow::protocol::{EngineMessage, FetchMessage, Message, PlaybackMessage};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_dir = dirs::config_dir().unwrap();
    let config_file = config_dir.join("cueflow.toml");

    if !config_file.exists() {
        let default_config = Config::default();

        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        std::fs::write(
            config_file.clone(),
            toml::to_string(&default_config).unwrap(),
        )
        .unwrap();
    }

    let config_content = std::fs::read_to_string(config_file.clone()).unwrap();
    let config = sanitize_config(toml::from_str::<Config>(&config_content).unwrap_or_default());

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        info!("usage: cueflow <media files...>");
        return Ok(());
    }

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(1024);
    let mut bus_receiver = bus_sender.subscribe();

    let scheduler = Scheduler::activate(
        &config,
        Box::new(ClockWorkerFactory),
        bus_sender.clone(),
    )?;

    let root = scheduler.root();
    for path in &paths {
        let title = Path::new(path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        let item = Arc::new(MediaItem::new(format!("file:{path}"), title));
        if scheduler.add_leaf(root, item).is_none() {
            error!("cannot add {path} to the playlist");
        }
    }

    // The demo drives the scheduler once through the playlist and exits
    // when it runs out.
    let mut flags = scheduler.flags();
    flags.play_and_exit = true;
    scheduler.set_flags(flags);
    scheduler.play();

    loop {
        match bus_receiver.blocking_recv() {
            Ok(Message::Playback(PlaybackMessage::ItemStarted(started))) => {
                info!(
                    "playing '{}' ({}) play_count={}",
                    started.title, started.uri, started.play_count
                );
            }
            Ok(Message::Playback(PlaybackMessage::Stopped)) => {
                info!("playback stopped");
            }
            Ok(Message::Fetch(FetchMessage::ArtRequested(request))) => {
                debug!("art requested for '{}'", request.title);
            }
            Ok(Message::Engine(EngineMessage::ExitRequested)) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("event receiver lagged by {skipped} messages");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    scheduler.deactivate();
    info!("exiting");
    Ok(())
}
