use std::{
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use music_stream_core::{
    audio::{download_track, working_dir_base, FileMediaElement, Mixer, SoftwareBackend},
    format_time, load_tracks, AppConfig, AudioGraph, Bar, ErrorReporter, FrameClock, JsonCatalog,
    Painter, PlaybackObserver, PlaybackState, SongList, StaticCatalog, Theme, Track, TrackId,
    TrackSource, TracingReporter,
};
use tracing_subscriber::EnvFilter;

const RECOVERY_MESSAGE: &str =
    "An unexpected error occurred! Something went wrong. Restart the player to continue.";
const COLUMNS: usize = 48;
const LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match panic::catch_unwind(AssertUnwindSafe(|| run(cli))) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "music-stream failed");
            ExitCode::FAILURE
        }
        Err(_) => {
            eprintln!("{RECOVERY_MESSAGE}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> music_stream_core::Result<()> {
    match cli.command {
        Commands::List(catalog) => run_list(&catalog),
        Commands::Play(args) => run_play(args),
        Commands::Download(args) => run_download(&args),
    }
}

fn run_list(args: &CatalogArgs) -> music_stream_core::Result<()> {
    let reporter = TracingReporter::new();
    let tracks = load_tracks(args.source().as_ref(), &reporter);
    for (index, track) in tracks.iter().enumerate() {
        println!(
            "{:>2}. {:<24} {}  {}",
            index + 1,
            track.title,
            track.created_at.format("%b %-d, %Y"),
            track.source
        );
    }
    Ok(())
}

fn run_download(args: &DownloadArgs) -> music_stream_core::Result<()> {
    let reporter = TracingReporter::new();
    let tracks = load_tracks(args.catalog.source().as_ref(), &reporter);
    let base = working_dir_base();
    for track in select(&tracks, &args.selection)? {
        let written = download_track(track, base.as_ref(), &args.to)?;
        println!("{:<24} {}", track.title, written.display());
    }
    Ok(())
}

fn run_play(args: PlayArgs) -> music_stream_core::Result<()> {
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    config.validate()?;

    let mut settings = config.settings();
    if args.concurrent {
        settings.exclusive_playback = false;
    }
    if let Some(theme) = args.theme {
        settings.theme = theme;
    }

    let reporter = Arc::new(TracingReporter::new());
    let tracks = load_tracks(args.catalog.source().as_ref(), reporter.as_ref());
    let selected: Vec<TrackId> = select(&tracks, &args.selection)?
        .into_iter()
        .map(Track::id)
        .collect();

    let mixer = Mixer::new(config.audio.sample_rate);
    let output = open_output(&mixer);
    let graph = AudioGraph::new(SoftwareBackend::new(mixer.clone()), config.audio.clone());
    let reporter_handle: Arc<dyn ErrorReporter> = reporter.clone();
    let mut list = SongList::new(
        graph,
        settings,
        reporter_handle,
        Arc::new(LogObserver),
        config.visualizer.clone(),
    );
    let exclusive = list.coordinator().is_exclusive()?;
    tracing::info!(exclusive, theme = %settings.theme, "starting playback");

    let interval = Duration::from_millis(config.playback.time_update_interval_ms);
    let mut screens = Vec::with_capacity(tracks.len());
    for track in &tracks {
        let painter = TerminalPainter::new(config.visualizer.width, config.visualizer.height);
        screens.push((track.id(), track.title.clone(), painter.screen()));
        list.mount(
            track.clone(),
            Box::new(FileMediaElement::new(interval)),
            Box::new(painter),
        )?;
    }

    for id in &selected {
        list.toggle(id)?;
    }

    let mut clock = FrameClock::new(config.visualizer.frame_rate)?;
    let status_every = u64::from(config.visualizer.frame_rate / 4).max(1);
    loop {
        let delta = clock.tick();
        if output.is_none() {
            mixer.advance(delta)?;
        }
        list.frame(settings.theme);

        if clock.frames() % status_every == 0 {
            print_status(&list, &screens);
        }
        if list.is_quiet() {
            break;
        }
    }

    if let Some(message) = reporter.last_message() {
        eprintln!("{message}");
    }
    tracing::info!(frames = clock.frames(), elapsed = ?clock.elapsed(), "playback finished");
    Ok(())
}

#[cfg(feature = "device-output")]
type Output = music_stream_core::audio::DeviceOutput;

#[cfg(not(feature = "device-output"))]
type Output = ();

/// Opens the output device when available. `None` means the mixer is
/// advanced by the frame loop instead.
fn open_output(mixer: &Mixer) -> Option<Output> {
    #[cfg(feature = "device-output")]
    {
        match music_stream_core::audio::DeviceOutput::open(mixer.clone()) {
            Ok(device) => {
                tracing::debug!(sample_rate = device.sample_rate(), "mixer driven by the device");
                return Some(device);
            }
            Err(err) => tracing::warn!(error = %err, "no audio output, running headless"),
        }
    }
    #[cfg(not(feature = "device-output"))]
    tracing::debug!(sample_rate = ?mixer.sample_rate(), "running headless");
    None
}

fn print_status(list: &SongList, screens: &[(TrackId, String, Arc<Mutex<String>>)]) {
    for (id, title, screen) in screens {
        let Some(session) = list.session(id) else {
            continue;
        };
        if session.state() != PlaybackState::Playing {
            continue;
        }
        let bars = screen.lock().map(|line| line.clone()).unwrap_or_default();
        let progress = session.progress();
        let total = progress
            .duration
            .map(format_time)
            .unwrap_or_else(|| "--:--".to_string());
        let left = progress
            .time_left()
            .map(format_time)
            .unwrap_or_else(|| "--:--".to_string());
        println!("{title:<24} {bars:<width$} {total} -{left}", width = COLUMNS);
    }
}

/// Resolves each selector (a 1-based index or a title) to a track.
fn select<'a>(tracks: &'a [Track], selection: &[String]) -> music_stream_core::Result<Vec<&'a Track>> {
    selection
        .iter()
        .map(|selector| {
            let by_index = selector
                .parse::<usize>()
                .ok()
                .and_then(|index| index.checked_sub(1))
                .and_then(|index| tracks.get(index));
            by_index
                .or_else(|| {
                    tracks
                        .iter()
                        .find(|track| track.title.eq_ignore_ascii_case(selector))
                })
                .ok_or_else(|| {
                    music_stream_core::MusicStreamError::msg(format!("no track matches '{selector}'"))
                })
        })
        .collect()
}

/// Renders bars into a line of block characters shared with the status
/// printer.
struct TerminalPainter {
    width: f32,
    height: f32,
    screen: Arc<Mutex<String>>,
}

impl TerminalPainter {
    fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            screen: Arc::new(Mutex::new(String::new())),
        }
    }

    fn screen(&self) -> Arc<Mutex<String>> {
        self.screen.clone()
    }
}

impl Painter for TerminalPainter {
    fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    fn paint(&mut self, _snapshot: &[u8], bars: &[Bar]) {
        let mut columns = [0.0_f32; COLUMNS];
        for bar in bars {
            let column = ((bar.x / self.width) * COLUMNS as f32) as usize;
            if let Some(slot) = columns.get_mut(column) {
                *slot = slot.max(bar.height / self.height);
            }
        }
        let line: String = columns
            .iter()
            .map(|level| {
                let index = (level.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
                LEVELS[index]
            })
            .collect();
        if let Ok(mut screen) = self.screen.lock() {
            *screen = line;
        }
    }

    fn clear(&mut self) {
        if let Ok(mut screen) = self.screen.lock() {
            screen.clear();
        }
    }
}

struct LogObserver;

impl PlaybackObserver for LogObserver {
    fn state_changed(&self, track: &TrackId, state: PlaybackState) {
        tracing::info!(%track, ?state, "playback state");
    }

    fn ended(&self, track: &TrackId) {
        tracing::info!(%track, "track ended");
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream songs with a live frequency visualiser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the song catalog.
    List(CatalogArgs),
    /// Play the selected songs while drawing their spectrum.
    Play(PlayArgs),
    /// Copy the selected songs into a directory, named by title.
    Download(DownloadArgs),
}

#[derive(Args, Debug)]
struct CatalogArgs {
    /// `songs.json` file to read instead of the built-in demo songs.
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Prefix prepended to every song url.
    #[arg(long, default_value = "")]
    base_url: String,
}

impl CatalogArgs {
    fn source(&self) -> Box<dyn TrackSource> {
        match &self.catalog {
            Some(path) => Box::new(JsonCatalog::new(path, self.base_url.clone())),
            None => Box::new(StaticCatalog::sample(&self.base_url)),
        }
    }
}

#[derive(Args, Debug)]
struct PlayArgs {
    #[command(flatten)]
    catalog: CatalogArgs,
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Allow several songs to play at once.
    #[arg(long)]
    concurrent: bool,
    #[arg(long)]
    theme: Option<Theme>,
    /// Songs to start, by 1-based index or title.
    #[arg(required = true)]
    selection: Vec<String>,
}

#[derive(Args, Debug)]
struct DownloadArgs {
    #[command(flatten)]
    catalog: CatalogArgs,
    /// Directory the files are copied into.
    #[arg(long, default_value = ".")]
    to: PathBuf,
    /// Songs to copy, by 1-based index or title.
    #[arg(required = true)]
    selection: Vec<String>,
}
