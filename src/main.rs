mod api;
mod cli;
mod config;
mod downloader;
mod errors;
mod metadata;
mod resolver;
mod utils;

use clap::Parser;
use log::{error, info};

use crate::cli::Cli;
use crate::config::DownloadOptions;
use crate::downloader::transcode::FfmpegTranscoder;
use crate::errors::{AppError, Result};
use crate::metadata::MetadataEnricher;
use crate::resolver::ResolvedUrl;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Cli::parse();
    match run(args).await {
        Ok(()) => info!("Download completed."),
        Err(err) => {
            error!("Download failed: {}", err);
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let options = DownloadOptions {
        output_dir: args.path.clone(),
        overwrite: args.if_exists,
        sort: args.sort,
    };
    utils::ensure_dir_exists(&options.output_dir).await?;

    // A missing credential for an explicitly selected metadata source is
    // fatal here, before any fetch begins.
    let enricher = MetadataEnricher::from_mode(args.metadata_source)?;
    let vk = api::VkClient::new(args.token.clone());
    let transcoder = FfmpegTranscoder::new();
    // Media client without an overall timeout: large tracks legitimately
    // take longer than any fixed request deadline.
    let http = reqwest::Client::builder()
        .user_agent(api::USER_AGENT)
        .connect_timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    match resolve_input(&args)? {
        ResolvedUrl::Track(track_ref) => {
            let track = vk.get_track(&track_ref).await?;
            downloader::download_track(&http, &transcoder, &enricher, &track, &options).await?;
        }
        ResolvedUrl::Playlist(playlist_ref) => {
            if let Some(title) = vk.get_playlist_title(&playlist_ref).await {
                info!("Playlist title: {}", title);
            }
            let tracks = vk.get_playlist_tracks(&playlist_ref).await?;
            info!("Playlist tracks received: {}", tracks.len());
            downloader::download_tracks_with_skip_log(
                &http,
                &transcoder,
                &enricher,
                &tracks,
                &options,
            )
            .await?;
        }
        ResolvedUrl::UserAudios { owner_id } => {
            let tracks = vk.get_user_tracks(owner_id).await?;
            info!("User audio tracks received: {}", tracks.len());
            downloader::download_tracks_with_skip_log(
                &http,
                &transcoder,
                &enricher,
                &tracks,
                &options,
            )
            .await?;
        }
    }

    Ok(())
}

/// Classifies the URL from whichever input flag was given and checks that
/// its shape matches the flag.
fn resolve_input(args: &Cli) -> Result<ResolvedUrl> {
    let (url, wanted) = if let Some(url) = &args.track {
        (url, "track")
    } else if let Some(url) = &args.playlist {
        (url, "playlist")
    } else if let Some(url) = &args.user {
        (url, "user")
    } else {
        // clap's input group guarantees one of the three is present
        return Err(AppError::InvalidUrl("no input URL given".to_string()));
    };

    let resolved = resolver::classify(url)?;
    let matches_flag = matches!(
        (&resolved, wanted),
        (ResolvedUrl::Track(_), "track")
            | (ResolvedUrl::Playlist(_), "playlist")
            | (ResolvedUrl::UserAudios { .. }, "user")
    );
    if !matches_flag {
        return Err(AppError::InvalidUrl(format!(
            "URL does not look like a {} URL: {}",
            wanted, url
        )));
    }
    Ok(resolved)
}
