//! Classification of VK audio URLs into typed references.
//!
//! Three shapes are recognized: a single track, a playlist, and a user
//! audio library. Everything else is rejected before any network call.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRef {
    pub owner_id: i64,
    pub audio_id: u64,
    pub access_key: Option<String>,
}

impl TrackRef {
    /// The `<owner>_<id>[_<key>]` form the VK API expects in `audios=`.
    pub fn audio_ref(&self) -> String {
        match &self.access_key {
            Some(key) => format!("{}_{}_{}", self.owner_id, self.audio_id, key),
            None => format!("{}_{}", self.owner_id, self.audio_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRef {
    pub owner_id: i64,
    pub playlist_id: u64,
    pub access_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedUrl {
    Track(TrackRef),
    Playlist(PlaylistRef),
    UserAudios { owner_id: i64 },
}

fn track_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"vk\.com/audio(-?\d+)_(\d+)(?:_([A-Za-z0-9]+))?").expect("valid regex")
    })
}

fn playlist_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"vk\.com/music/playlist/(-?\d+)_(\d+)(?:_([A-Za-z0-9]+))?")
            .expect("valid regex")
    })
}

fn user_audio_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"vk\.com/audios(-?\d+)").expect("valid regex"))
}

pub fn parse_track_url(url: &str) -> Result<TrackRef> {
    let captures = track_pattern().captures(url).ok_or_else(|| {
        AppError::InvalidUrl(
            "invalid track URL, expected https://vk.com/audio<owner_id>_<audio_id>_<access_key>"
                .to_string(),
        )
    })?;
    Ok(TrackRef {
        owner_id: parse_number(&captures[1])?,
        audio_id: parse_number(&captures[2])?,
        access_key: captures.get(3).map(|m| m.as_str().to_string()),
    })
}

pub fn parse_playlist_url(url: &str) -> Result<PlaylistRef> {
    let captures = playlist_pattern().captures(url).ok_or_else(|| {
        AppError::InvalidUrl(
            "invalid playlist URL, expected https://vk.com/music/playlist/<owner_id>_<playlist_id>_<access_key>"
                .to_string(),
        )
    })?;
    Ok(PlaylistRef {
        owner_id: parse_number(&captures[1])?,
        playlist_id: parse_number(&captures[2])?,
        access_key: captures.get(3).map(|m| m.as_str().to_string()),
    })
}

pub fn parse_user_audio_url(url: &str) -> Result<i64> {
    let captures = user_audio_pattern().captures(url).ok_or_else(|| {
        AppError::InvalidUrl(
            "invalid user audio URL, expected https://vk.com/audios<owner_id>".to_string(),
        )
    })?;
    parse_number(&captures[1])
}

/// Classifies an arbitrary URL string into one of the three known shapes.
pub fn classify(url: &str) -> Result<ResolvedUrl> {
    if let Ok(playlist) = parse_playlist_url(url) {
        return Ok(ResolvedUrl::Playlist(playlist));
    }
    if let Ok(track) = parse_track_url(url) {
        return Ok(ResolvedUrl::Track(track));
    }
    if let Ok(owner_id) = parse_user_audio_url(url) {
        return Ok(ResolvedUrl::UserAudios { owner_id });
    }
    Err(AppError::InvalidUrl(format!(
        "unrecognized VK audio URL: {}",
        url
    )))
}

fn parse_number<T: std::str::FromStr>(digits: &str) -> Result<T> {
    digits
        .parse()
        .map_err(|_| AppError::InvalidUrl(format!("identifier out of range: {}", digits)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_track_url_with_access_key() {
        let parsed = parse_track_url("https://vk.com/audio142774160_456240188_71b76a487b").unwrap();
        assert_eq!(parsed.owner_id, 142774160);
        assert_eq!(parsed.audio_id, 456240188);
        assert_eq!(parsed.access_key.as_deref(), Some("71b76a487b"));
        assert_eq!(parsed.audio_ref(), "142774160_456240188_71b76a487b");
    }

    #[test]
    fn parses_track_url_without_access_key_and_negative_owner() {
        let parsed = parse_track_url("vk.com/audio-2001545048_456240188").unwrap();
        assert_eq!(parsed.owner_id, -2001545048);
        assert_eq!(parsed.access_key, None);
        assert_eq!(parsed.audio_ref(), "-2001545048_456240188");
    }

    #[test]
    fn parses_playlist_url() {
        let parsed =
            parse_playlist_url("https://vk.com/music/playlist/142774160_74879692_d64ad4a866")
                .unwrap();
        assert_eq!(parsed.owner_id, 142774160);
        assert_eq!(parsed.playlist_id, 74879692);
        assert_eq!(parsed.access_key.as_deref(), Some("d64ad4a866"));
    }

    #[test]
    fn parses_user_audio_url() {
        assert_eq!(parse_user_audio_url("https://vk.com/audios142774160").unwrap(), 142774160);
        assert_eq!(parse_user_audio_url("vk.com/audios-99").unwrap(), -99);
    }

    #[test]
    fn rejects_unknown_shapes() {
        for url in [
            "https://vk.com/feed",
            "https://example.com/audio1_2",
            "vk.com/audio_nope",
            "not a url at all",
            "",
        ] {
            assert!(matches!(classify(url), Err(AppError::InvalidUrl(_))), "{url}");
        }
    }

    #[test]
    fn classify_distinguishes_the_three_shapes() {
        assert!(matches!(
            classify("https://vk.com/audio1_2"),
            Ok(ResolvedUrl::Track(_))
        ));
        assert!(matches!(
            classify("https://vk.com/music/playlist/1_2"),
            Ok(ResolvedUrl::Playlist(_))
        ));
        assert!(matches!(
            classify("https://vk.com/audios1"),
            Ok(ResolvedUrl::UserAudios { owner_id: 1 })
        ));
    }
}
