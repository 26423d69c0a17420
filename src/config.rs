use std::path::PathBuf;

use clap::ValueEnum;

/// What to do when the computed output path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverwritePolicy {
    /// Leave the existing file untouched and report success.
    Skip,
    /// Download again and overwrite.
    Replace,
}

/// How output files are laid out under the target directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortMode {
    /// `<dir>/<Artist> - <Title>.mp3`
    None,
    /// `<dir>/<Artist>/<Title>.mp3`
    ArtistFolder,
    /// `<dir>/<Artist>/<Artist> - <Title>.mp3`
    ArtistFolderName,
}

/// External metadata source for ID3 tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetadataMode {
    /// No external lookup; only the filename fallback applies.
    None,
    /// itunes -> deezer -> musicbrainz -> lastfm -> discogs, first match wins.
    Auto,
    Itunes,
    Deezer,
    Musicbrainz,
    Lastfm,
    Discogs,
}

/// Per-run settings shared by every track in a batch.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_dir: PathBuf,
    pub overwrite: OverwritePolicy,
    pub sort: SortMode,
}
