//! Metadata enrichment: an ordered waterfall over external providers with a
//! filename-parse fallback, stamped into the file as ID3v2.4 tags.

pub mod providers;

use std::path::Path;
use std::time::Duration;

use id3::TagLike;
use log::{info, warn};
use reqwest::Client;

use crate::api::ApiTrack;
use crate::config::MetadataMode;
use crate::errors::{AppError, Result};

use providers::MetadataProvider;

/// Tag fields for one track. Empty strings never appear; absent data is
/// `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub date: Option<String>,
    pub genre: Option<String>,
}

impl TagMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.date.is_none()
            && self.genre.is_none()
    }
}

pub(crate) fn build_metadata(
    title: &str,
    artist: &str,
    album: &str,
    date: &str,
    genre: &str,
) -> TagMetadata {
    fn non_empty(value: &str) -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    TagMetadata {
        title: non_empty(title),
        artist: non_empty(artist),
        album: non_empty(album),
        date: non_empty(date),
        genre: non_empty(genre),
    }
}

/// Fetches track metadata from external sources and writes ID3 tags.
pub struct MetadataEnricher {
    client: Client,
    providers: Vec<Box<dyn MetadataProvider>>,
}

impl MetadataEnricher {
    /// Builds the enricher for the selected source mode. Fails with
    /// [`AppError::MissingCredential`] when an explicitly selected provider
    /// lacks its credential, so the problem surfaces before any download.
    pub fn from_mode(mode: MetadataMode) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(crate::api::USER_AGENT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            providers: providers::providers_for_mode(mode)?,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_providers(providers: Vec<Box<dyn MetadataProvider>>) -> Self {
        Self {
            client: Client::new(),
            providers,
        }
    }

    /// Looks up metadata for the track and stamps it into the file. Falls
    /// back to parsing the filename when no provider matches.
    pub async fn enrich_mp3(&self, file_path: &Path, track: &ApiTrack) -> Result<()> {
        let (source, metadata) = match self.lookup(&track.artist, &track.title).await {
            Some(found) => found,
            None => match metadata_from_filename(file_path) {
                Some(parsed) => ("filename", parsed),
                None => return Ok(()),
            },
        };

        write_tags(file_path, &metadata)?;
        info!(
            "Metadata updated from {}: {}",
            source,
            file_path.file_name().unwrap_or_default().to_string_lossy()
        );
        Ok(())
    }

    /// Tries providers in order, returning the first non-empty match and the
    /// name of the provider that produced it. Provider failures are logged
    /// and treated as no-match; the waterfall keeps going.
    pub async fn lookup(&self, artist: &str, title: &str) -> Option<(&'static str, TagMetadata)> {
        let artist = artist.trim();
        let title = title.trim();
        if artist.is_empty() || title.is_empty() {
            return None;
        }

        for provider in &self.providers {
            match provider.search(&self.client, artist, title).await {
                Ok(Some(metadata)) if !metadata.is_empty() => {
                    return Some((provider.name(), metadata));
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        "Metadata source {} failed for '{} - {}': {}",
                        provider.name(),
                        artist,
                        title,
                        err
                    );
                }
            }
        }
        None
    }
}

/// Last-resort metadata from the file path itself: an `"Artist - Title"`
/// stem, else the parent directory as artist, else the stem as bare title.
pub fn metadata_from_filename(file_path: &Path) -> Option<TagMetadata> {
    let stem = file_path.file_stem()?.to_string_lossy();
    let stem = stem.trim();
    if stem.is_empty() {
        return None;
    }

    if let Some((artist, title)) = stem.split_once(" - ") {
        let artist = artist.trim();
        let title = title.trim();
        if !artist.is_empty() && !title.is_empty() {
            return Some(build_metadata(title, artist, "", "", ""));
        }
    }

    let parent_artist = file_path
        .parent()
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy().trim().to_string())
        .filter(|name| !name.is_empty() && name.as_str() != ".");
    if let Some(artist) = parent_artist {
        return Some(build_metadata(stem, &artist, "", "", ""));
    }

    Some(build_metadata(stem, "", "", "", ""))
}

fn write_tags(file_path: &Path, metadata: &TagMetadata) -> Result<()> {
    let mut tag = id3::Tag::read_from_path(file_path).unwrap_or_else(|_| id3::Tag::new());

    if let Some(title) = &metadata.title {
        tag.set_title(title);
    }
    if let Some(artist) = &metadata.artist {
        tag.set_artist(artist);
        tag.set_album_artist(artist);
    }
    if let Some(album) = &metadata.album {
        tag.set_album(album);
    }
    if let Some(date) = &metadata.date {
        if let Some(year) = date.get(..4).and_then(|year| year.parse::<i32>().ok()) {
            tag.set_year(year);
        }
    }
    if let Some(genre) = &metadata.genre {
        tag.set_genre(genre);
    }

    tag.write_to_path(file_path, id3::Version::Id3v24)
        .map_err(|err| {
            AppError::Metadata(format!(
                "cannot write tags to {}: {}",
                file_path.display(),
                err
            ))
        })
}
