//! Per-track download pipeline and the batch loop around it.
//!
//! A track is materialized either by streaming a progressive file straight
//! to disk or by reassembling an HLS stream and converting it to mp3. The
//! batch loop isolates every failure: a bad track becomes a line in the
//! `_skipped.txt` sidecar and the run continues.

pub mod hls;
pub mod transcode;

use std::io::Write;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use log::{error, info, warn};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::api::ApiTrack;
use crate::config::{DownloadOptions, OverwritePolicy, SortMode};
use crate::errors::Result;
use crate::metadata::MetadataEnricher;
use crate::utils::{ensure_dir_exists, sanitize_filename, sanitize_track_filename};

use transcode::Transcoder;

pub const SKIP_REPORT_NAME: &str = "_skipped.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Progressive,
    HlsManifest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub url: String,
    pub kind: StreamKind,
}

impl StreamDescriptor {
    pub fn from_url(url: &str) -> Self {
        let kind = if is_hls_url(url) {
            StreamKind::HlsManifest
        } else {
            StreamKind::Progressive
        };
        Self {
            url: url.to_string(),
            kind,
        }
    }
}

fn is_hls_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_lowercase().contains(".m3u8"),
        Err(_) => url.to_lowercase().contains(".m3u8"),
    }
}

/// What happened to one track. `AlreadyExists` is a success under the skip
/// policy; `NoStreamUrl` becomes a skip record in batch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Written(PathBuf),
    AlreadyExists(PathBuf),
    NoStreamUrl,
}

fn track_filename(track: &ApiTrack, include_artist: bool) -> String {
    if include_artist {
        format!(
            "{}.mp3",
            sanitize_track_filename(track.artist_or_unknown(), track.title_or_unknown())
        )
    } else {
        format!("{}.mp3", sanitize_filename(track.title_or_unknown()))
    }
}

/// Deterministic final path for a track: same metadata, sort mode and
/// directory always produce the same path.
pub fn build_track_output_path(track: &ApiTrack, options: &DownloadOptions) -> PathBuf {
    match options.sort {
        SortMode::None => options.output_dir.join(track_filename(track, true)),
        SortMode::ArtistFolder => options
            .output_dir
            .join(sanitize_filename(track.artist_or_unknown()))
            .join(track_filename(track, false)),
        SortMode::ArtistFolderName => options
            .output_dir
            .join(sanitize_filename(track.artist_or_unknown()))
            .join(track_filename(track, true)),
    }
}

async fn download_file(http: &Client, url: &str, destination: &Path) -> Result<()> {
    let response = http.get(url).send().await?.error_for_status()?;
    let mut stream = response.bytes_stream();
    let mut file = tokio::fs::File::create(destination).await?;
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Runs the whole per-track pipeline: materialize the stream, place the
/// file under the overwrite policy, then enrich tags (non-fatal).
///
/// All intermediate files live as scoped temp paths next to the output and
/// are removed on every exit path; the final path only ever sees complete
/// data (placed by rename).
pub async fn download_track(
    http: &Client,
    transcoder: &dyn Transcoder,
    enricher: &MetadataEnricher,
    track: &ApiTrack,
    options: &DownloadOptions,
) -> Result<TrackOutcome> {
    let name = track.display_name();

    if track.url.trim().is_empty() {
        warn!("Skipping track without download URL: {}", name);
        return Ok(TrackOutcome::NoStreamUrl);
    }

    let descriptor = StreamDescriptor::from_url(&track.url);
    let output_path = build_track_output_path(track, options);
    let parent = output_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    ensure_dir_exists(&parent).await?;

    if output_path.exists() {
        match options.overwrite {
            OverwritePolicy::Skip => {
                info!(
                    "Track already exists, skipping: {} ({})",
                    name,
                    output_path.display()
                );
                return Ok(TrackOutcome::AlreadyExists(output_path));
            }
            OverwritePolicy::Replace => {
                info!(
                    "Track already exists, replacing: {} ({})",
                    name,
                    output_path.display()
                );
            }
        }
    }

    if track.duration > 0 {
        info!("Track download started: {} ({}s)", name, track.duration);
    } else {
        info!("Track download started: {}", name);
    }
    match descriptor.kind {
        StreamKind::Progressive => {
            let part = tempfile::Builder::new()
                .prefix(".part-")
                .tempfile_in(&parent)?
                .into_temp_path();
            download_file(http, &descriptor.url, &part).await?;
            tokio::fs::rename(&part, &output_path).await?;
        }
        StreamKind::HlsManifest => {
            info!("HLS stream detected for track: {}", name);
            let ts_part = tempfile::Builder::new()
                .prefix(".hls-")
                .suffix(".ts")
                .tempfile_in(&parent)?
                .into_temp_path();
            hls::download_hls(http, &descriptor.url, &ts_part).await?;

            info!("Converting to mp3: {}", name);
            let mp3_part = tempfile::Builder::new()
                .prefix(".part-")
                .suffix(".mp3")
                .tempfile_in(&parent)?
                .into_temp_path();
            transcoder.transcode_to_mp3(&ts_part, &mp3_part)?;
            tokio::fs::rename(&mp3_part, &output_path).await?;
        }
    }
    info!("Track file saved: {}", output_path.display());

    let is_mp3 = output_path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("mp3"))
        .unwrap_or(false);
    if is_mp3 {
        if let Err(err) = enricher.enrich_mp3(&output_path, track).await {
            warn!(
                "Metadata update failed for {}: {}",
                output_path.display(),
                err
            );
        }
    }

    Ok(TrackOutcome::Written(output_path))
}

fn append_skip_record(report_path: &Path, planned: &Path, reason: &str) -> Result<()> {
    if let Some(parent) = report_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let name = planned
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| planned.display().to_string());
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(report_path)?;
    writeln!(file, "{}: {}", name, reason)?;
    Ok(())
}

/// Batch loop over a playlist or user library. Every track is attempted
/// exactly once; failures are recorded in the `_skipped.txt` sidecar and
/// never abort the run.
pub async fn download_tracks_with_skip_log(
    http: &Client,
    transcoder: &dyn Transcoder,
    enricher: &MetadataEnricher,
    tracks: &[ApiTrack],
    options: &DownloadOptions,
) -> Result<()> {
    let report_path = options.output_dir.join(SKIP_REPORT_NAME);
    let mut skipped = 0usize;

    for track in tracks {
        let planned = build_track_output_path(track, options);
        match download_track(http, transcoder, enricher, track, options).await {
            Ok(TrackOutcome::NoStreamUrl) => {
                append_skip_record(&report_path, &planned, "no download URL")?;
                skipped += 1;
            }
            Ok(_) => {}
            Err(err) => {
                error!(
                    "Track failed and will be skipped: {} ({})",
                    planned.file_name().unwrap_or_default().to_string_lossy(),
                    err
                );
                append_skip_record(&report_path, &planned, &err.to_string())?;
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        warn!(
            "Skipped tracks written to: {} (count: {})",
            report_path.display(),
            skipped
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::transcode::testing::FakeTranscoder;
    use super::*;
    use crate::config::MetadataMode;

    fn track(artist: &str, title: &str, url: &str) -> ApiTrack {
        ApiTrack {
            artist: artist.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            duration: 0,
        }
    }

    fn options(dir: &Path, sort: SortMode, overwrite: OverwritePolicy) -> DownloadOptions {
        DownloadOptions {
            output_dir: dir.to_path_buf(),
            overwrite,
            sort,
        }
    }

    fn none_enricher() -> MetadataEnricher {
        MetadataEnricher::from_mode(MetadataMode::None).unwrap()
    }

    #[test]
    fn stream_kind_detection() {
        assert_eq!(
            StreamDescriptor::from_url("https://cdn.example.com/index.m3u8?sig=1").kind,
            StreamKind::HlsManifest
        );
        assert_eq!(
            StreamDescriptor::from_url("https://cdn.example.com/track.mp3").kind,
            StreamKind::Progressive
        );
        // query strings do not make a progressive URL an HLS one
        assert_eq!(
            StreamDescriptor::from_url("https://cdn.example.com/track.mp3?list=x.m3u8").kind,
            StreamKind::Progressive
        );
    }

    #[test]
    fn output_paths_per_sort_mode() {
        let base = Path::new("/music");
        let track = track("Queen", "Bohemian Rhapsody", "");

        let flat = options(base, SortMode::None, OverwritePolicy::Skip);
        assert_eq!(
            build_track_output_path(&track, &flat),
            Path::new("/music/Queen - Bohemian Rhapsody.mp3")
        );

        let folder = options(base, SortMode::ArtistFolder, OverwritePolicy::Skip);
        assert_eq!(
            build_track_output_path(&track, &folder),
            Path::new("/music/Queen/Bohemian Rhapsody.mp3")
        );

        let folder_name = options(base, SortMode::ArtistFolderName, OverwritePolicy::Skip);
        assert_eq!(
            build_track_output_path(&track, &folder_name),
            Path::new("/music/Queen/Queen - Bohemian Rhapsody.mp3")
        );
    }

    #[test]
    fn output_path_sanitizes_and_defaults_missing_fields() {
        let base = Path::new("/music");
        let nasty = track("AC/DC", "T.N.T?", "");
        let opts = options(base, SortMode::ArtistFolder, OverwritePolicy::Skip);
        assert_eq!(
            build_track_output_path(&nasty, &opts),
            Path::new("/music/AC_DC/T.N.T_.mp3")
        );

        let unnamed = track("", "", "");
        let flat = options(base, SortMode::None, OverwritePolicy::Skip);
        assert_eq!(
            build_track_output_path(&unnamed, &flat),
            Path::new("/music/Unknown Artist - Unknown Title.mp3")
        );
    }

    #[test]
    fn output_path_is_deterministic() {
        let base = Path::new("/music");
        let track = track("Queen", "Innuendo", "");
        let opts = options(base, SortMode::ArtistFolderName, OverwritePolicy::Skip);
        assert_eq!(
            build_track_output_path(&track, &opts),
            build_track_output_path(&track, &opts)
        );
    }

    #[tokio::test]
    async fn skip_policy_returns_before_any_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), SortMode::None, OverwritePolicy::Skip);
        let track = track("Queen", "Innuendo", "https://invalid.invalid/track.mp3");

        let existing = build_track_output_path(&track, &opts);
        std::fs::write(&existing, b"first run").unwrap();

        // the URL is unreachable on purpose: under the skip policy the
        // existing file must short-circuit before any network access
        let transcoder = FakeTranscoder::default();
        let outcome = download_track(&Client::new(), &transcoder, &none_enricher(), &track, &opts)
            .await
            .unwrap();
        assert_eq!(outcome, TrackOutcome::AlreadyExists(existing.clone()));
        assert_eq!(std::fs::read(&existing).unwrap(), b"first run");
        assert_eq!(
            transcoder.calls.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn batch_records_failures_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), SortMode::None, OverwritePolicy::Skip);

        let good = track("Queen", "Innuendo", "https://invalid.invalid/track.mp3");
        std::fs::write(build_track_output_path(&good, &opts), b"already here").unwrap();
        let tracks = vec![
            good,
            track("Queen", "Gone Track", ""),
            track("Queen", "Other Gone Track", ""),
        ];

        let transcoder = FakeTranscoder::default();
        download_tracks_with_skip_log(&Client::new(), &transcoder, &none_enricher(), &tracks, &opts)
            .await
            .unwrap();

        let report = std::fs::read_to_string(dir.path().join(SKIP_REPORT_NAME)).unwrap();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Queen - Gone Track.mp3:"));
        assert!(lines[1].starts_with("Queen - Other Gone Track.mp3:"));
    }

    #[tokio::test]
    async fn batch_without_failures_writes_no_report() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), SortMode::None, OverwritePolicy::Skip);

        let existing = track("Queen", "Innuendo", "https://invalid.invalid/track.mp3");
        std::fs::write(build_track_output_path(&existing, &opts), b"kept").unwrap();

        let transcoder = FakeTranscoder::default();
        download_tracks_with_skip_log(
            &Client::new(),
            &transcoder,
            &none_enricher(),
            &[existing],
            &opts,
        )
        .await
        .unwrap();

        assert!(!dir.path().join(SKIP_REPORT_NAME).exists());
    }
}
