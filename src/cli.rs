use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use crate::config::{MetadataMode, OverwritePolicy, SortMode};

#[derive(Debug, Parser)]
#[command(name = "vk-audio-downloader")]
#[command(version)]
#[command(about = "Download music from VK by track or playlist URL.")]
#[command(group(ArgGroup::new("input").required(true).args(["track", "playlist", "user"])))]
pub struct Cli {
    /// VK track URL, e.g. https://vk.com/audio142774160_456240188_key
    #[arg(long)]
    pub track: Option<String>,

    /// VK playlist URL, e.g. https://vk.com/music/playlist/142774160_74879692_key
    #[arg(long)]
    pub playlist: Option<String>,

    /// VK user audio URL, e.g. https://vk.com/audios142774160
    #[arg(long)]
    pub user: Option<String>,

    /// Directory where audio files will be saved
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// VK API token
    #[arg(long, env = "VK_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Behavior when the target file already exists
    #[arg(long = "if-exists", value_enum, default_value_t = OverwritePolicy::Skip)]
    pub if_exists: OverwritePolicy,

    /// Output sorting mode
    #[arg(long, value_enum, default_value_t = SortMode::None)]
    pub sort: SortMode,

    /// External metadata source for ID3 tags
    #[arg(long = "metadata-source", value_enum, default_value_t = MetadataMode::None)]
    pub metadata_source: MetadataMode,
}
