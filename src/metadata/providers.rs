//! External metadata providers behind one trait.
//!
//! Each provider answers `search(artist, title)` with its best match or
//! nothing. Adding a source means adding one impl and one arm in
//! [`providers_for_mode`]; the waterfall itself never changes.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;

use crate::config::MetadataMode;
use crate::errors::{AppError, Result};

use super::{build_metadata, TagMetadata};

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, client: &Client, artist: &str, title: &str)
        -> Result<Option<TagMetadata>>;
}

/// Lowercase and strip everything that is not ASCII alphanumeric, so that
/// "Bohemian Rhapsody (Remastered)" and "bohemian rhapsody remastered"
/// compare equal.
pub(crate) fn normalize_for_match(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn artist_matches(query_norm: &str, candidate_norm: &str) -> bool {
    candidate_norm.contains(query_norm) || query_norm.contains(candidate_norm)
}

fn first_year(value: &str) -> Option<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid regex"));
    re.find(value).map(|m| m.as_str())
}

async fn get_json(client: &Client, url: &str) -> Result<Value> {
    Ok(client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?)
}

pub struct Itunes;

#[async_trait]
impl MetadataProvider for Itunes {
    fn name(&self) -> &'static str {
        "itunes"
    }

    async fn search(
        &self,
        client: &Client,
        artist: &str,
        title: &str,
    ) -> Result<Option<TagMetadata>> {
        let url = format!(
            "https://itunes.apple.com/search?term={}&entity=song&limit=10",
            urlencoding::encode(&format!("{} {}", artist, title))
        );
        let data = get_json(client, &url).await?;
        Ok(pick_itunes(&data, artist, title))
    }
}

fn pick_itunes(data: &Value, artist: &str, title: &str) -> Option<TagMetadata> {
    let results = data["results"].as_array()?;

    let normalized_title = normalize_for_match(title);
    let normalized_artist = normalize_for_match(artist);
    let mut best: Option<(bool, bool, &Value)> = None;

    for item in results {
        let item_title = normalize_for_match(item["trackName"].as_str().unwrap_or(""));
        let item_artist = normalize_for_match(item["artistName"].as_str().unwrap_or(""));
        let rank = (
            item_title == normalized_title,
            artist_matches(&normalized_artist, &item_artist),
        );
        if best.map_or(true, |(t, a, _)| rank > (t, a)) {
            best = Some((rank.0, rank.1, item));
        }
    }

    let (_, _, item) = best?;
    let release_date = item["releaseDate"].as_str().unwrap_or("");
    let release_date = release_date.get(..10).unwrap_or(release_date);

    Some(build_metadata(
        item["trackName"].as_str().unwrap_or(title),
        item["artistName"].as_str().unwrap_or(artist),
        item["collectionName"].as_str().unwrap_or(""),
        release_date,
        item["primaryGenreName"].as_str().unwrap_or(""),
    ))
}

pub struct Deezer;

#[async_trait]
impl MetadataProvider for Deezer {
    fn name(&self) -> &'static str {
        "deezer"
    }

    async fn search(
        &self,
        client: &Client,
        artist: &str,
        title: &str,
    ) -> Result<Option<TagMetadata>> {
        let url = format!(
            "https://api.deezer.com/search?q={}&limit=10",
            urlencoding::encode(&format!("artist:\"{}\" track:\"{}\"", artist, title))
        );
        let data = get_json(client, &url).await?;
        Ok(pick_deezer(&data, artist, title))
    }
}

fn pick_deezer(data: &Value, artist: &str, title: &str) -> Option<TagMetadata> {
    let items = data["data"].as_array()?;

    let normalized_title = normalize_for_match(title);
    let normalized_artist = normalize_for_match(artist);
    let mut best: Option<(bool, bool, &Value)> = None;

    for item in items {
        let item_title = normalize_for_match(item["title"].as_str().unwrap_or(""));
        let item_artist = normalize_for_match(item["artist"]["name"].as_str().unwrap_or(""));
        let rank = (
            item_title == normalized_title,
            artist_matches(&normalized_artist, &item_artist),
        );
        if best.map_or(true, |(t, a, _)| rank > (t, a)) {
            best = Some((rank.0, rank.1, item));
        }
    }

    let (_, _, item) = best?;
    Some(build_metadata(
        item["title"].as_str().unwrap_or(title),
        item["artist"]["name"].as_str().unwrap_or(artist),
        item["album"]["title"].as_str().unwrap_or(""),
        "",
        "",
    ))
}

pub struct MusicBrainz;

#[async_trait]
impl MetadataProvider for MusicBrainz {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    async fn search(
        &self,
        client: &Client,
        artist: &str,
        title: &str,
    ) -> Result<Option<TagMetadata>> {
        let url = format!(
            "https://musicbrainz.org/ws/2/recording?fmt=json&limit=5&query={}",
            urlencoding::encode(&format!("recording:\"{}\" AND artist:\"{}\"", title, artist))
        );
        let data = get_json(client, &url).await?;
        Ok(pick_musicbrainz(&data, artist, title))
    }
}

fn pick_musicbrainz(data: &Value, artist: &str, title: &str) -> Option<TagMetadata> {
    let recordings = data["recordings"].as_array()?;

    let normalized_title = normalize_for_match(title);
    let normalized_artist = normalize_for_match(artist);
    let mut best: Option<((bool, bool, i64), &Value)> = None;

    for recording in recordings {
        let recording_title = normalize_for_match(recording["title"].as_str().unwrap_or(""));
        let credit_names = recording["artist-credit"]
            .as_array()
            .map(|credits| {
                credits
                    .iter()
                    .filter_map(|credit| credit["name"].as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        let normalized_credit = normalize_for_match(&credit_names);

        let rank = (
            recording_title == normalized_title,
            artist_matches(&normalized_artist, &normalized_credit),
            recording["score"].as_i64().unwrap_or(0),
        );
        if best.as_ref().map_or(true, |(r, _)| rank > *r) {
            best = Some((rank, recording));
        }
    }

    let (_, recording) = best?;
    let release = recording["releases"]
        .as_array()
        .and_then(|releases| releases.first())
        .cloned()
        .unwrap_or(Value::Null);
    let genre = recording["tags"]
        .as_array()
        .and_then(|tags| tags.first())
        .and_then(|tag| tag["name"].as_str())
        .unwrap_or("");

    Some(build_metadata(
        recording["title"].as_str().unwrap_or(title),
        artist,
        release["title"].as_str().unwrap_or(""),
        release["date"].as_str().unwrap_or(""),
        genre,
    ))
}

pub struct LastFm {
    api_key: String,
}

impl LastFm {
    pub const ENV_KEY: &'static str = "LASTFM_API_KEY";

    pub fn from_env() -> Option<Self> {
        std::env::var(Self::ENV_KEY)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .map(|api_key| Self { api_key })
    }
}

#[async_trait]
impl MetadataProvider for LastFm {
    fn name(&self) -> &'static str {
        "lastfm"
    }

    async fn search(
        &self,
        client: &Client,
        artist: &str,
        title: &str,
    ) -> Result<Option<TagMetadata>> {
        let url = format!(
            "https://ws.audioscrobbler.com/2.0/?method=track.getInfo&artist={}&track={}&api_key={}&format=json&autocorrect=1",
            urlencoding::encode(artist),
            urlencoding::encode(title),
            urlencoding::encode(&self.api_key)
        );
        let data = get_json(client, &url).await?;
        Ok(pick_lastfm(&data, artist, title))
    }
}

fn pick_lastfm(data: &Value, artist: &str, title: &str) -> Option<TagMetadata> {
    let track = data.get("track")?.as_object()?;

    let album = track
        .get("album")
        .and_then(|album| album["title"].as_str())
        .unwrap_or("");
    let date = track
        .get("wiki")
        .and_then(|wiki| wiki["published"].as_str())
        .and_then(first_year)
        .unwrap_or("");
    let genre = track
        .get("toptags")
        .and_then(|toptags| toptags["tag"].as_array())
        .and_then(|tags| tags.first())
        .and_then(|tag| tag["name"].as_str())
        .unwrap_or("");
    // `artist` is an object on track.getInfo but a plain string on some
    // legacy responses.
    let artist_name = match track.get("artist") {
        Some(Value::Object(map)) => map.get("name").and_then(Value::as_str).unwrap_or(artist),
        Some(Value::String(name)) => name.as_str(),
        _ => artist,
    };

    Some(build_metadata(
        track.get("name").and_then(Value::as_str).unwrap_or(title),
        artist_name,
        album,
        date,
        genre,
    ))
}

pub struct Discogs {
    token: String,
}

impl Discogs {
    pub const ENV_KEY: &'static str = "DISCOGS_TOKEN";

    pub fn from_env() -> Option<Self> {
        std::env::var(Self::ENV_KEY)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .map(|token| Self { token })
    }
}

#[async_trait]
impl MetadataProvider for Discogs {
    fn name(&self) -> &'static str {
        "discogs"
    }

    async fn search(
        &self,
        client: &Client,
        artist: &str,
        title: &str,
    ) -> Result<Option<TagMetadata>> {
        let url = format!(
            "https://api.discogs.com/database/search?type=release&artist={}&track={}&per_page=10&token={}",
            urlencoding::encode(artist),
            urlencoding::encode(title),
            urlencoding::encode(&self.token)
        );
        let data = get_json(client, &url).await?;
        Ok(pick_discogs(&data, artist, title))
    }
}

/// Discogs reports releases as one `"Artist - Title"` display string.
fn split_display_title<'a>(display: &'a str, artist: &'a str, title: &'a str) -> (&'a str, &'a str) {
    if let Some((left, right)) = display.split_once(" - ") {
        let left = left.trim();
        let right = right.trim();
        if !left.is_empty() && !right.is_empty() {
            return (left, right);
        }
    }
    (artist, title)
}

fn pick_discogs(data: &Value, artist: &str, title: &str) -> Option<TagMetadata> {
    let results = data["results"].as_array()?;

    let normalized_title = normalize_for_match(title);
    let normalized_artist = normalize_for_match(artist);
    let mut best: Option<(bool, bool, &Value)> = None;

    for item in results {
        let display = item["title"].as_str().unwrap_or("");
        let (item_artist, item_track) = split_display_title(display, artist, title);
        let rank = (
            normalize_for_match(item_track) == normalized_title,
            artist_matches(&normalized_artist, &normalize_for_match(item_artist)),
        );
        if best.map_or(true, |(t, a, _)| rank > (t, a)) {
            best = Some((rank.0, rank.1, item));
        }
    }

    let (_, _, item) = best?;
    let display = item["title"].as_str().unwrap_or("");
    let (result_artist, result_title) = split_display_title(display, artist, title);

    let date = match item["year"].as_i64() {
        Some(year) if year > 0 => year.to_string(),
        _ => String::new(),
    };
    let genre = item["genre"]
        .as_array()
        .and_then(|genres| genres.first())
        .and_then(Value::as_str)
        .unwrap_or("");

    Some(build_metadata(result_title, result_artist, "", &date, genre))
}

/// Resolves a source mode into the ordered provider list.
///
/// In `auto` mode the credentialed providers are dropped silently when their
/// environment variable is absent; explicitly selecting one of them without
/// the credential is an error.
pub fn providers_for_mode(mode: MetadataMode) -> Result<Vec<Box<dyn MetadataProvider>>> {
    let providers: Vec<Box<dyn MetadataProvider>> = match mode {
        MetadataMode::None => Vec::new(),
        MetadataMode::Auto => {
            let mut list: Vec<Box<dyn MetadataProvider>> =
                vec![Box::new(Itunes), Box::new(Deezer), Box::new(MusicBrainz)];
            match LastFm::from_env() {
                Some(provider) => list.push(Box::new(provider)),
                None => log::debug!("lastfm skipped: {} is not set", LastFm::ENV_KEY),
            }
            match Discogs::from_env() {
                Some(provider) => list.push(Box::new(provider)),
                None => log::debug!("discogs skipped: {} is not set", Discogs::ENV_KEY),
            }
            list
        }
        MetadataMode::Itunes => vec![Box::new(Itunes)],
        MetadataMode::Deezer => vec![Box::new(Deezer)],
        MetadataMode::Musicbrainz => vec![Box::new(MusicBrainz)],
        MetadataMode::Lastfm => vec![Box::new(LastFm::from_env().ok_or_else(|| {
            AppError::MissingCredential(format!(
                "lastfm metadata source requires the {} environment variable",
                LastFm::ENV_KEY
            ))
        })?)],
        MetadataMode::Discogs => vec![Box::new(Discogs::from_env().ok_or_else(|| {
            AppError::MissingCredential(format!(
                "discogs metadata source requires the {} environment variable",
                Discogs::ENV_KEY
            ))
        })?)],
    };
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalization_strips_case_and_punctuation() {
        assert_eq!(normalize_for_match("Bohemian Rhapsody!"), "bohemianrhapsody");
        assert_eq!(normalize_for_match("AC/DC"), "acdc");
        assert_eq!(normalize_for_match("???"), "");
    }

    #[test]
    fn year_extraction() {
        assert_eq!(first_year("Published 12 Aug 1975, 14:00"), Some("1975"));
        assert_eq!(first_year("sometime in 2021"), Some("2021"));
        assert_eq!(first_year("no year here, 1875 is too old"), None);
    }

    #[test]
    fn itunes_prefers_exact_title_and_artist_over_first_result() {
        let data = json!({"results": [
            {"trackName": "Bohemian Rhapsody (Live)", "artistName": "Queen",
             "collectionName": "Live Aid"},
            {"trackName": "Bohemian Rhapsody", "artistName": "Queen",
             "collectionName": "A Night at the Opera",
             "releaseDate": "1975-11-21T00:00:00Z", "primaryGenreName": "Rock"},
        ]});
        let picked = pick_itunes(&data, "Queen", "Bohemian Rhapsody").unwrap();
        assert_eq!(picked.title.as_deref(), Some("Bohemian Rhapsody"));
        assert_eq!(picked.album.as_deref(), Some("A Night at the Opera"));
        assert_eq!(picked.date.as_deref(), Some("1975-11-21"));
        assert_eq!(picked.genre.as_deref(), Some("Rock"));
    }

    #[test]
    fn itunes_empty_results_is_no_match() {
        assert_eq!(pick_itunes(&json!({"results": []}), "a", "b"), None);
        assert_eq!(pick_itunes(&json!({}), "a", "b"), None);
    }

    #[test]
    fn deezer_reads_nested_artist_and_album() {
        let data = json!({"data": [
            {"title": "Bohemian Rhapsody",
             "artist": {"name": "Queen"},
             "album": {"title": "A Night at the Opera"}},
        ]});
        let picked = pick_deezer(&data, "Queen", "Bohemian Rhapsody").unwrap();
        assert_eq!(picked.artist.as_deref(), Some("Queen"));
        assert_eq!(picked.album.as_deref(), Some("A Night at the Opera"));
        assert_eq!(picked.date, None);
    }

    #[test]
    fn musicbrainz_breaks_ties_by_score() {
        let data = json!({"recordings": [
            {"title": "Bohemian Rhapsody", "score": 80,
             "artist-credit": [{"name": "Queen"}],
             "releases": [{"title": "Greatest Hits", "date": "1981"}]},
            {"title": "Bohemian Rhapsody", "score": 100,
             "artist-credit": [{"name": "Queen"}],
             "releases": [{"title": "A Night at the Opera", "date": "1975-11-21"}],
             "tags": [{"name": "rock"}]},
        ]});
        let picked = pick_musicbrainz(&data, "Queen", "Bohemian Rhapsody").unwrap();
        assert_eq!(picked.album.as_deref(), Some("A Night at the Opera"));
        assert_eq!(picked.genre.as_deref(), Some("rock"));
    }

    #[test]
    fn lastfm_handles_object_and_string_artists() {
        let object_artist = json!({"track": {
            "name": "Bohemian Rhapsody",
            "artist": {"name": "Queen"},
            "album": {"title": "A Night at the Opera"},
            "wiki": {"published": "12 Aug 2008, 22:29"},
            "toptags": {"tag": [{"name": "rock"}]},
        }});
        let picked = pick_lastfm(&object_artist, "queen", "bohemian rhapsody").unwrap();
        assert_eq!(picked.artist.as_deref(), Some("Queen"));
        assert_eq!(picked.date.as_deref(), Some("2008"));

        let string_artist = json!({"track": {"name": "Song", "artist": "Somebody"}});
        let picked = pick_lastfm(&string_artist, "x", "y").unwrap();
        assert_eq!(picked.artist.as_deref(), Some("Somebody"));
        assert_eq!(picked.album, None);
    }

    #[test]
    fn discogs_splits_display_title() {
        let data = json!({"results": [
            {"title": "Queen - Bohemian Rhapsody", "year": 1975, "genre": ["Rock"]},
        ]});
        let picked = pick_discogs(&data, "queen", "bohemian rhapsody").unwrap();
        assert_eq!(picked.artist.as_deref(), Some("Queen"));
        assert_eq!(picked.title.as_deref(), Some("Bohemian Rhapsody"));
        assert_eq!(picked.date.as_deref(), Some("1975"));
        assert_eq!(picked.genre.as_deref(), Some("Rock"));
    }

    #[test]
    fn mode_resolution_respects_credentials() {
        std::env::remove_var(LastFm::ENV_KEY);
        std::env::remove_var(Discogs::ENV_KEY);

        let auto = providers_for_mode(MetadataMode::Auto).unwrap();
        let names: Vec<_> = auto.iter().map(|provider| provider.name()).collect();
        assert_eq!(names, vec!["itunes", "deezer", "musicbrainz"]);

        assert!(providers_for_mode(MetadataMode::None).unwrap().is_empty());
        assert!(matches!(
            providers_for_mode(MetadataMode::Lastfm),
            Err(AppError::MissingCredential(_))
        ));
        assert!(matches!(
            providers_for_mode(MetadataMode::Discogs),
            Err(AppError::MissingCredential(_))
        ));
    }
}
