//! Binary entrypoint for the media-frame appliance.
//!
//! Delegates all logic to the library crate; this file only wires tasks,
//! channels and shutdown together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use media_frame::album::Album;
use media_frame::config::Configuration;
use media_frame::decode::{DecodeLimits, SharedJpegDecoder};
use media_frame::demux::AviMotionJpeg;
use media_frame::display::{DisplaySurface, LogDisplay};
use media_frame::error::Error;
use media_frame::events::ControllerRequest;
use media_frame::pool::ScratchPool;
use media_frame::tasks::{control, files, mutation, mutation::MutationQueue, slideshow::Slideshow, usb};
use media_frame::video::VideoPlayer;

#[derive(Debug, Parser)]
#[command(name = "media-frame", version, about = "media playback appliance")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("media_frame={level}")));
    fmt().with_env_filter(filter).with_target(false).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?
        .validated()
        .context("invalid configuration values")?;
    info!(library = %cfg.media_library_path.display(), "configuration loaded");

    let engine = SharedJpegDecoder::new(
        DecodeLimits::from_options(&cfg.decode),
        cfg.decode.acquire_timeout,
    );
    let pool = Arc::new(ScratchPool::new(cfg.scan.max_file_bytes as usize));
    let display: Arc<dyn DisplaySurface> = Arc::new(LogDisplay::new());

    let (requests_tx, requests_rx) = mpsc::channel::<ControllerRequest>(16);
    let (mutations, mutation_rx) = MutationQueue::new(cfg.mutation_queue_capacity);
    let cancel = CancellationToken::new();

    let (slideshow, slideshow_task) = Slideshow::spawn(
        cfg.slideshow.interval,
        cfg.slideshow.idle_timeout,
        requests_tx.clone(),
        cancel.clone(),
    );

    // No audio device on the headless build; video decodes, audio extraction
    // is skipped entirely.
    let video = VideoPlayer::new(
        cfg.video.clone(),
        engine.clone(),
        Arc::clone(&display),
        None,
        Box::new(|| Box::new(AviMotionJpeg::new())),
        requests_tx.clone(),
        tokio::runtime::Handle::current(),
    );

    let album = Arc::new(Album::new(
        cfg.clone(),
        engine,
        pool,
        video.clone(),
        slideshow.clone(),
        Arc::clone(&display),
    ));

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {err}");
                return;
            }
            info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    tasks.spawn({
        let album = Arc::clone(&album);
        let cancel = cancel.clone();
        async move {
            control::run(album, requests_rx, cancel)
                .await
                .context("control task failed")
        }
    });

    tasks.spawn({
        let album = Arc::clone(&album);
        let cancel = cancel.clone();
        async move {
            mutation::run(mutation_rx, album, cancel)
                .await
                .context("mutation worker failed")
        }
    });

    if cfg.watch_library {
        tasks.spawn({
            let library = cfg.media_library_path.clone();
            let mutations = mutations.clone();
            let cancel = cancel.clone();
            async move {
                // Watcher failures are non-fatal: the appliance keeps running
                // on explicit refresh notifications alone.
                if let Err(err) = files::run(library, mutations, cancel).await {
                    warn!("library watcher unavailable: {err}");
                }
                Ok(())
            }
        });
    }

    if let Some(usb_cfg) = cfg.usb.clone() {
        let (usb_tx, usb_rx) = mpsc::channel(8);
        let port: Arc<dyn usb::UsbPort> =
            Arc::new(usb::SysfsUsbPort::new(usb_cfg.state_path.clone()));
        tasks.spawn({
            let cancel = cancel.clone();
            async move {
                usb::poll(port, usb_cfg.poll_interval, usb_tx, cancel)
                    .await
                    .context("usb poll task failed")
            }
        });
        tasks.spawn({
            let album = Arc::clone(&album);
            let video = video.clone();
            let mutations = mutations.clone();
            let display = Arc::clone(&display);
            let library = cfg.media_library_path.clone();
            let cancel = cancel.clone();
            async move {
                usb::run(usb_rx, album, video, mutations, display, library, cancel)
                    .await
                    .context("usb reaction task failed")
            }
        });
    }

    // First scan and display. An empty library is not fatal: uploads or USB
    // transfers may populate it later.
    let startup = {
        let album = Arc::clone(&album);
        tokio::task::spawn_blocking(move || album.start()).await
    };
    match startup {
        Ok(Ok(())) => {}
        Ok(Err(Error::NoMedia)) => warn!("library is empty; waiting for media"),
        Ok(Err(err)) => {
            cancel.cancel();
            return Err(err).context("failed to start playback");
        }
        Err(err) => {
            cancel.cancel();
            return Err(err).context("startup task panicked");
        }
    }

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("task error: {err:?}"),
            Err(err) => error!("join error: {err}"),
        }
    }
    let _ = slideshow_task.await;

    // Release the extraction context and decode buffers before exit.
    let _ = video.stop();
    Ok(())
}
