use std::path::PathBuf;

use amdl::config::{CoverFormat, DownloadMode, RemuxMode, VideoCodec};
use amdl::models::{Album, Artist, TrackMetadata};
use amdl::queue::{ArtistMedia, ArtistSelector};
use amdl::{AmdlError, Config, Downloader, ProgressEvent};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "amdl-cli")]
#[command(about = "Download songs, albums, playlists and music videos from Apple Music", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/amdl/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Netscape cookies file exported from a logged-in browser session
    #[arg(short = 'c', long, global = true)]
    cookies_path: Option<PathBuf>,

    /// Output root
    #[arg(short, long, global = true)]
    output_path: Option<PathBuf>,

    #[arg(long, global = true)]
    temp_path: Option<PathBuf>,

    /// Remote CDM base URL
    #[arg(long, global = true)]
    cdm_url: Option<String>,

    /// Remote CDM secret (can also be set via AMDL_CDM_SECRET env var)
    #[arg(long, env = "AMDL_CDM_SECRET", global = true, hide_env_values = true)]
    cdm_secret: Option<String>,

    #[arg(long, global = true)]
    cdm_device: Option<String>,

    /// Download backend (ytdlp, nm3u8dlre)
    #[arg(long, global = true)]
    download_mode: Option<DownloadMode>,

    /// Remux backend (ffmpeg, mp4box)
    #[arg(long, global = true)]
    remux_mode: Option<RemuxMode>,

    /// Music video codec (h264, h265)
    #[arg(long, global = true)]
    codec_music_video: Option<VideoCodec>,

    /// Cover format (jpg, png, raw)
    #[arg(long, global = true)]
    cover_format: Option<CoverFormat>,

    #[arg(long, global = true)]
    cover_size: Option<u32>,

    /// Comma-separated tag names to leave out
    #[arg(long, global = true)]
    exclude_tags: Option<String>,

    /// Maximum file name length (values below 4 are ignored)
    #[arg(long, global = true)]
    truncate: Option<usize>,

    #[arg(long, global = true)]
    save_cover: bool,

    #[arg(long, global = true)]
    save_playlist: bool,

    #[arg(long, global = true)]
    overwrite: bool,

    #[arg(long, global = true)]
    synced_lyrics_only: bool,

    #[arg(long, global = true)]
    no_synced_lyrics: bool,

    /// Download music videos found in albums and playlists
    #[arg(long, global = true)]
    disable_music_video_skip: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more catalog URLs
    Download {
        urls: Vec<String>,

        /// Treat arguments as text files with one URL per line
        #[arg(long)]
        read_urls_as_txt: bool,
    },
    /// Search the catalog
    Search {
        term: String,

        /// Comma-separated result types
        #[arg(short, long, default_value = "songs,albums")]
        types: String,

        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = &self.cookies_path {
            config.cookies_path = Some(v.clone());
        }
        if let Some(v) = &self.output_path {
            config.output_path = v.clone();
        }
        if let Some(v) = &self.temp_path {
            config.temp_path = v.clone();
        }
        if let Some(v) = &self.cdm_url {
            config.cdm.url = v.clone();
        }
        if let Some(v) = &self.cdm_secret {
            config.cdm.secret = v.clone();
        }
        if let Some(v) = &self.cdm_device {
            config.cdm.device = Some(v.clone());
        }
        if let Some(v) = self.download_mode {
            config.download_mode = v;
        }
        if let Some(v) = self.remux_mode {
            config.remux_mode = v;
        }
        if let Some(v) = self.codec_music_video {
            config.codec_music_video = v;
        }
        if let Some(v) = self.cover_format {
            config.cover_format = v;
        }
        if let Some(v) = self.cover_size {
            config.cover_size = v;
        }
        if let Some(v) = &self.exclude_tags {
            config.exclude_tags = Some(v.clone());
        }
        if self.truncate.is_some() {
            config.truncate = self.truncate;
        }
        config.save_cover |= self.save_cover;
        config.save_playlist |= self.save_playlist;
        config.overwrite |= self.overwrite;
        config.synced_lyrics_only |= self.synced_lyrics_only;
        config.no_synced_lyrics |= self.no_synced_lyrics;
        config.disable_music_video_skip |= self.disable_music_video_skip;
    }
}

/// Prompts on stdin for artist downloads.
struct PromptSelector;

async fn prompt(question: &str) -> Result<String, AmdlError> {
    println!("{}", question);
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_string())
}

/// Parse "all" or a comma-separated list of 1-based numbers.
fn parse_choices(input: &str, count: usize) -> Result<Vec<usize>, AmdlError> {
    if input.eq_ignore_ascii_case("all") {
        return Ok((0..count).collect());
    }
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<usize>() {
            Ok(n) if (1..=count).contains(&n) => Ok(n - 1),
            _ => Err(AmdlError::Config(format!("invalid choice {:?}", s))),
        })
        .collect()
}

#[async_trait]
impl ArtistSelector for PromptSelector {
    async fn choose_media(&self, artist: &Artist) -> amdl::Result<ArtistMedia> {
        let answer = prompt(&format!(
            "{}: download [1] albums ({}) or [2] music videos ({})?",
            artist.name(),
            artist.albums().len(),
            artist.music_videos().len()
        ))
        .await?;
        match answer.as_str() {
            "1" | "" => Ok(ArtistMedia::Albums),
            "2" => Ok(ArtistMedia::MusicVideos),
            other => Err(AmdlError::Config(format!("invalid choice {:?}", other))),
        }
    }

    async fn choose_albums(&self, albums: &[Album]) -> amdl::Result<Vec<usize>> {
        for (i, album) in albums.iter().enumerate() {
            println!("{:>3}. {}", i + 1, album.selection_label());
        }
        let answer = prompt("Albums to download (e.g. 1,3 or all):").await?;
        parse_choices(&answer, albums.len())
    }

    async fn choose_music_videos(&self, videos: &[TrackMetadata]) -> amdl::Result<Vec<usize>> {
        for (i, video) in videos.iter().enumerate() {
            println!("{:>3}. {}", i + 1, video.display_name());
        }
        let answer = prompt("Music videos to download (e.g. 1,3 or all):").await?;
        parse_choices(&answer, videos.len())
    }
}

fn read_url_files(paths: &[String]) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut urls = Vec::new();
    for path in paths {
        let content = std::fs::read_to_string(path)?;
        urls.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
    }
    Ok(urls)
}

fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::QueueBuilt { reference, total } => {
            println!("📋 {}: {} item(s)", reference, total)
        }
        ProgressEvent::TrackStarted {
            index,
            total,
            title,
        } => println!("⬇️  [{}/{}] {}", index + 1, total, title),
        ProgressEvent::TrackFinished { path, .. } => println!("✅ {}", path.display()),
        ProgressEvent::TrackSkipped { title, reason, .. } => {
            println!("⏭️  {} ({})", title, reason)
        }
        ProgressEvent::TrackFailed { title, error, .. } => println!("❌ {}: {}", title, error),
        ProgressEvent::Finished {
            successful,
            skipped,
            failed,
        } => println!(
            "   Done: {} downloaded, {} skipped, {} failed",
            successful, skipped, failed
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).with_target(false).init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    cli.apply(&mut config);

    let mut downloader = Downloader::new(config).await?;

    match &cli.command {
        Commands::Download {
            urls,
            read_urls_as_txt,
        } => {
            let urls = if *read_urls_as_txt {
                read_url_files(urls)?
            } else {
                urls.clone()
            };

            let mut events = Box::pin(downloader.subscribe());
            let printer = tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    print_event(&event);
                }
            });

            let mut failures = 0;
            for url in &urls {
                match downloader.download_url(url, &PromptSelector).await {
                    Ok(result) => failures += result.failed.len(),
                    Err(e) => {
                        eprintln!("❌ {}: {}", url, e);
                        failures += 1;
                    }
                }
            }

            downloader.unsubscribe();
            printer.await?;
            if failures > 0 {
                println!("{} item(s) failed", failures);
            }
        }
        Commands::Search {
            term,
            types,
            limit,
        } => {
            println!("Searching for '{}'...", term);
            let results = downloader.catalog().search(term, types, *limit, 0).await?;
            let Some(groups) = results.as_object() else {
                println!("No results");
                return Ok(());
            };
            for (kind, group) in groups {
                println!("{}:", kind);
                let items = group["data"].as_array().cloned().unwrap_or_default();
                for (i, item) in items.iter().enumerate() {
                    let attrs = &item["attributes"];
                    println!(
                        "{:>3}. {} - {} ({})",
                        i + 1,
                        attrs["artistName"].as_str().unwrap_or("?"),
                        attrs["name"].as_str().unwrap_or("?"),
                        attrs["url"].as_str().unwrap_or("")
                    );
                }
            }
        }
    }

    Ok(())
}
