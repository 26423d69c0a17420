//! HLS playlist handling for segmented audio streams.
//!
//! Supports master playlists (the best variant by declared bandwidth is
//! followed), `#EXT-X-MEDIA-SEQUENCE` numbering, and AES-128-CBC encrypted
//! segments with keys fetched from the playlist's key URI.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockModeDecrypt, KeyIvInit};
use log::info;
use regex::Regex;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::errors::{AppError, Result};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentKey {
    pub method: Option<String>,
    pub uri: Option<String>,
    pub iv: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub url: String,
    pub key: SegmentKey,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playlist {
    /// Variant URIs ordered by declared bandwidth, best first.
    Master { variants: Vec<String> },
    Media { segments: Vec<Segment> },
}

fn attribute_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([A-Z0-9-]+)=(("[^"]*")|[^,]+)"#).expect("valid regex"))
}

/// Parses an `ATTR=value,ATTR="quoted value"` attribute list.
pub fn parse_attributes(line: &str) -> HashMap<String, String> {
    let mut attributes = HashMap::new();
    for captures in attribute_pattern().captures_iter(line) {
        let key = captures[1].to_string();
        let mut value = captures[2].trim().to_string();
        if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
            value = value[1..value.len() - 1].to_string();
        }
        attributes.insert(key, value);
    }
    attributes
}

fn join_url(base: &str, reference: &str) -> Result<String> {
    Url::parse(base)
        .and_then(|parsed| parsed.join(reference))
        .map(|joined| joined.to_string())
        .map_err(|err| AppError::HlsParse(format!("cannot resolve URI {}: {}", reference, err)))
}

pub fn parse_playlist(text: &str, playlist_url: &str) -> Result<Playlist> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.first() != Some(&"#EXTM3U") {
        return Err(AppError::HlsParse("invalid HLS playlist content".to_string()));
    }

    let mut media_sequence = 0u64;
    let mut current_key = SegmentKey::default();
    let mut segments: Vec<Segment> = Vec::new();
    let mut variants: Vec<(u64, String)> = Vec::new();
    let mut pending_stream_inf: Option<HashMap<String, String>> = None;

    for line in lines {
        if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            if let Ok(parsed) = value.parse() {
                media_sequence = parsed;
            }
        } else if let Some(rest) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending_stream_inf = Some(parse_attributes(rest));
        } else if pending_stream_inf.is_some() && !line.starts_with('#') {
            let attrs = pending_stream_inf.take().unwrap_or_default();
            let bandwidth = attrs
                .get("BANDWIDTH")
                .and_then(|value| value.parse().ok())
                .unwrap_or(0u64);
            variants.push((bandwidth, join_url(playlist_url, line)?));
        } else if let Some(rest) = line.strip_prefix("#EXT-X-KEY:") {
            let attrs = parse_attributes(rest);
            current_key = SegmentKey {
                method: attrs.get("METHOD").cloned(),
                uri: match attrs.get("URI") {
                    Some(uri) => Some(join_url(playlist_url, uri)?),
                    None => None,
                },
                iv: attrs.get("IV").cloned(),
            };
        } else if line.starts_with('#') {
            continue;
        } else {
            let sequence = media_sequence + segments.len() as u64;
            segments.push(Segment {
                url: join_url(playlist_url, line)?,
                key: current_key.clone(),
                sequence,
            });
        }
    }

    if !variants.is_empty() {
        variants.sort_by(|a, b| b.0.cmp(&a.0));
        return Ok(Playlist::Master {
            variants: variants.into_iter().map(|(_, url)| url).collect(),
        });
    }

    if segments.is_empty() {
        return Err(AppError::HlsParse(
            "no media segments found in HLS playlist".to_string(),
        ));
    }

    Ok(Playlist::Media { segments })
}

/// Strips PKCS#7 padding when the tail actually looks like padding;
/// some encoders emit unpadded final blocks.
fn unpadded_len(data: &[u8]) -> usize {
    match data.last() {
        Some(&pad) if (1..=16).contains(&pad) => {
            let pad = pad as usize;
            if data.len() >= pad && data[data.len() - pad..].iter().all(|&byte| byte as usize == pad)
            {
                data.len() - pad
            } else {
                data.len()
            }
        }
        _ => data.len(),
    }
}

pub fn decrypt_segment(
    mut data: Vec<u8>,
    key: &[u8],
    iv_hex: Option<&str>,
    sequence: u64,
) -> Result<Vec<u8>> {
    let key: [u8; 16] = key
        .try_into()
        .map_err(|_| AppError::HlsParse("AES-128 key must be 16 bytes".to_string()))?;

    let iv: [u8; 16] = match iv_hex {
        Some(iv_hex) => {
            let normalized = iv_hex
                .strip_prefix("0x")
                .or_else(|| iv_hex.strip_prefix("0X"))
                .unwrap_or(iv_hex);
            let bytes = hex::decode(normalized)
                .map_err(|err| AppError::HlsParse(format!("invalid key IV: {}", err)))?;
            bytes
                .try_into()
                .map_err(|_| AppError::HlsParse("key IV must be 16 bytes".to_string()))?
        }
        None => {
            // Per RFC 8216: without an explicit IV the media sequence
            // number, big-endian, is the IV.
            let mut iv = [0u8; 16];
            iv[8..].copy_from_slice(&sequence.to_be_bytes());
            iv
        }
    };

    if data.is_empty() || data.len() % 16 != 0 {
        return Err(AppError::HlsParse(
            "encrypted segment length is not a multiple of the AES block size".to_string(),
        ));
    }

    let decryptor = Aes128CbcDec::new(&key.into(), &iv.into());
    decryptor
        .decrypt_padded::<NoPadding>(&mut data)
        .map_err(|_| AppError::HlsParse("AES-128 segment decryption failed".to_string()))?;

    let keep = unpadded_len(&data);
    data.truncate(keep);
    Ok(data)
}

async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    Ok(client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?)
}

async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    Ok(client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?
        .to_vec())
}

/// Downloads an HLS stream into one file: fetches the playlist, follows
/// master variants, then appends each segment in order, decrypting when the
/// playlist says so. Keys are fetched once per URI.
pub async fn download_hls(client: &Client, url: &str, destination: &Path) -> Result<()> {
    let mut playlist_url = url.to_string();
    let segments = loop {
        let text = fetch_text(client, &playlist_url).await?;
        match parse_playlist(&text, &playlist_url)? {
            Playlist::Master { variants } => {
                let best = variants.into_iter().next().ok_or_else(|| {
                    AppError::HlsParse("master playlist has no variants".to_string())
                })?;
                info!("HLS master playlist detected, using variant: {}", best);
                playlist_url = best;
            }
            Playlist::Media { segments } => break segments,
        }
    };

    let mut key_cache: HashMap<String, Vec<u8>> = HashMap::new();
    let mut output = tokio::fs::File::create(destination).await?;

    for segment in segments {
        let mut data = fetch_bytes(client, &segment.url).await?;

        if segment.key.method.as_deref() == Some("AES-128") {
            let key_uri = segment.key.uri.as_deref().ok_or_else(|| {
                AppError::HlsParse("HLS segment is encrypted but key URI is missing".to_string())
            })?;
            if !key_cache.contains_key(key_uri) {
                let key = fetch_bytes(client, key_uri).await?;
                key_cache.insert(key_uri.to_string(), key);
            }
            data = decrypt_segment(
                data,
                &key_cache[key_uri],
                segment.key.iv.as_deref(),
                segment.sequence,
            )?;
        }

        output.write_all(&data).await?;
    }

    output.flush().await?;
    Ok(())
}
