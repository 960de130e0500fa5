use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invalid built-in regex")
}

static EXTENSION_AT_END: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\.(mkv|mp4|avi|mov|webm|m4v|3gp|ts|m2ts|flv)$"));
static EXTENSION_ANYWHERE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(mkv|mp4|avi|mov|webm|m4v|3gp|m2ts|ts|flv)\b"));
static AUDIO_CHANNELS: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)(\d+(?:\.\d+)?CH)"));
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| re(r"[_.]+"));
static IMDB: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)(tt\d{6,8})"));
static BRACKET_TAG: LazyLock<Regex> =
    LazyLock::new(|| re(r"\[([^\]]+)\]|\(([^)]+)\)|\{([^}]+)\}"));
static BRACKET_GROUP: LazyLock<Regex> = LazyLock::new(|| re(r"\[.*?\]|\(.*?\)|\{.*?\}"));

static QUALITY: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)(480p|720p|1080p|2160p|4K)"));
static RIP_TAG: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)webrip|bluray|hdrip|dvdrip|bd5|bdrip|web-dl|web dl"));
static RIP_INLINE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)(WEBRip|BluRay|HDRip|DVDRip|BRRip|\bCAM\b|HDTS|WEB-DL|WEB DL)")
});
static SOURCE_TAG: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)netflix|amazon|prime|disney|hbo|hulu|apple"));
static SOURCE_INLINE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)(Netflix|Amazon|Prime Video|Disney\+|HBO|Hulu|Apple ?TV)"));
static AUDIO_TAG: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)aac|dts-hd|dts-x|dts|truehd|ac3|eac3|flac|mp3|m4a|atmos"));
static AUDIO_INLINE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)(AAC|DTS-HD|DTS-X|DTS|TrueHD|EAC3|AC3|FLAC|MP3|M4A|Atmos)")
});
static RESOLUTION: LazyLock<Regex> = LazyLock::new(|| re(r"(\d{3,4}x\d{3,4})"));
static HEVC: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)x265|h\.?265|hevc"));
static AVC: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)x264|h\.?264|\bavc\b"));
static VP9: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)vp9"));
static BIT_DEPTH: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)(8bit|10bit|12bit)"));
static DOLBY_VISION: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)dolby.?vision|\bdv\b"));
static HDR10_PLUS: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bhdr10\+"));
static HDR10: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bhdr10\b"));
static HDR: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bhdr\b"));
static SEASON_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| re(r"[sS](\d{1,2})[ ._-]?[eE](\d{1,2})"));
static CROSS_EPISODE: LazyLock<Regex> = LazyLock::new(|| re(r"\b(\d{1,2})x(\d{1,2})\b"));
static YEAR: LazyLock<Regex> = LazyLock::new(|| re(r"\b(19\d{2}|20\d{2})\b"));
static METADATA_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)(480p|720p|1080p|2160p|4K|WEBRip|BluRay|HDRip|DVDRip|BRRip|\bCAM\b|HDTS|WEB-DL)")
});
static TITLE_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    re(concat!(
        r"(?i)(tt\d{6,8}|",
        r"\bs\d{1,2}e\d{1,2}|",
        r"\bs\d{1,2}(?:\s|-)|",
        r"\b\d{1,2}x\d{1,2}\b|",
        r"480p|720p|1080p|2160p|4K|",
        r"WEBRip|BluRay|HDRip|DVDRip|\bCAM\b)"
    ))
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    #[default]
    Movie,
    Series,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Movie => "Movie",
            ContentType::Series => "Series",
        }
    }

    /// maps stored labels, including legacy "tv"/"show", onto a content type
    pub fn from_label(label: &str) -> Self {
        match label.to_lowercase().as_str() {
            "series" | "tv" | "show" => ContentType::Series,
            _ => ContentType::Movie,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMetadata {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub quality: Option<String>,
    pub rip: Option<String>,
    pub source: Option<String>,
    pub extension: Option<String>,
    pub resolution: Option<String>,
    pub audio: Option<String>,
    pub audio_channels: Option<String>,
    pub video_codec: Option<String>,
    pub bit_depth: Option<String>,
    pub hdr_format: Option<String>,
    pub imdb: Option<String>,
    pub content_type: ContentType,
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

fn first_group(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn codec_of(text: &str) -> Option<&'static str> {
    if HEVC.is_match(text) {
        Some("x265/HEVC")
    } else if AVC.is_match(text) {
        Some("x264/AVC")
    } else if VP9.is_match(text) {
        Some("VP9")
    } else {
        None
    }
}

fn hdr_of(text: &str) -> Option<&'static str> {
    if DOLBY_VISION.is_match(text) {
        Some("Dolby Vision")
    } else if HDR10_PLUS.is_match(text) {
        Some("HDR10+")
    } else if HDR10.is_match(text) {
        Some("HDR10")
    } else if HDR.is_match(text) {
        Some("HDR")
    } else {
        None
    }
}

/// picks the release year and its byte offset in `text`
///
/// With several candidates the last year in front of the first quality/rip
/// marker wins, since later numbers are usually part of the release tags.
fn select_year(text: &str) -> Option<(i32, usize)> {
    let years: Vec<(i32, usize)> = YEAR
        .captures_iter(text)
        .filter_map(|caps| {
            let m = caps.get(1)?;
            Some((m.as_str().parse().ok()?, m.start()))
        })
        .collect();

    match years.len() {
        0 => None,
        1 => Some(years[0]),
        _ => {
            let chosen = match METADATA_MARKER.find(text) {
                Some(marker) => years
                    .iter()
                    .filter(|(_, pos)| *pos < marker.start())
                    .last()
                    .or_else(|| years.last()),
                None => years.last(),
            };
            chosen.copied()
        }
    }
}

fn clean_title(raw: &str) -> Option<String> {
    let without_brackets = BRACKET_GROUP.replace_all(raw, " ");
    let first_line = without_brackets.split('\n').next().unwrap_or("");
    let title = first_line
        .trim()
        .trim_matches(|c: char| c == ' ' || c == '-' || c == '_' || c == '.')
        .trim_end_matches(|c: char| c == '(' || c == '[' || c == '{' || c.is_whitespace())
        .trim_matches(|c: char| c == ' ' || c == '-' || c == '_' || c == '.');
    let collapsed = title.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// extracts release metadata from a caption and/or file name
pub fn parse_metadata(caption: Option<&str>, filename: Option<&str>) -> ParsedMetadata {
    let joined = format!("{} {}", caption.unwrap_or(""), filename.unwrap_or(""));
    let text = joined.trim();
    let mut md = ParsedMetadata::default();

    if text.is_empty() {
        return md;
    }

    // read before separators become spaces so the dots survive
    if let Some(m) = EXTENSION_AT_END.find(text) {
        md.extension = Some(m.as_str().to_lowercase());
    }
    if let Some(channels) = first_group(&AUDIO_CHANNELS, text) {
        md.audio_channels = Some(channels.to_uppercase());
    }

    let t = SEPARATORS.replace_all(text, " ").to_string();

    md.imdb = first_group(&IMDB, &t);

    for caps in BRACKET_TAG.captures_iter(&t) {
        let Some(tag) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let tag = tag.as_str();

        if let Some(quality) = first_group(&QUALITY, tag) {
            md.quality = Some(quality);
        }
        if RIP_TAG.is_match(tag) {
            md.rip = Some(tag.to_string());
        }
        if SOURCE_TAG.is_match(tag) {
            md.source = Some(tag.to_string());
        }
        if AUDIO_TAG.is_match(tag) {
            md.audio = Some(tag.to_string());
        }
        // the pre-normalization value keeps decimals like 7.1CH intact
        if md.audio_channels.is_none() {
            md.audio_channels = first_group(&AUDIO_CHANNELS, tag).map(|ch| ch.to_uppercase());
        }
        if let Some(codec) = codec_of(tag) {
            md.video_codec = Some(codec.to_string());
        }
        if let Some(depth) = first_group(&BIT_DEPTH, tag) {
            md.bit_depth = Some(depth);
        }
        if let Some(hdr) = hdr_of(tag) {
            md.hdr_format = Some(hdr.to_string());
        }
    }

    if md.quality.is_none() {
        md.quality = first_group(&QUALITY, &t);
    }
    if md.rip.is_none() {
        md.rip = first_group(&RIP_INLINE, &t);
    }
    if md.source.is_none() {
        md.source = first_group(&SOURCE_INLINE, &t);
    }
    if md.extension.is_none() {
        md.extension = first_group(&EXTENSION_ANYWHERE, &t).map(|ext| format!(".{}", ext.to_lowercase()));
    }
    md.resolution = first_group(&RESOLUTION, &t);
    if md.audio.is_none() {
        md.audio = first_group(&AUDIO_INLINE, &t);
    }
    if md.audio_channels.is_none() {
        md.audio_channels = first_group(&AUDIO_CHANNELS, &t).map(|ch| ch.to_uppercase());
    }
    if md.video_codec.is_none() {
        md.video_codec = codec_of(&t).map(str::to_string);
    }
    if md.bit_depth.is_none() {
        md.bit_depth = first_group(&BIT_DEPTH, &t);
    }
    if md.hdr_format.is_none() {
        md.hdr_format = hdr_of(&t).map(str::to_string);
    }

    let episode_caps = SEASON_EPISODE
        .captures(&t)
        .or_else(|| CROSS_EPISODE.captures(&t));
    if let Some(caps) = episode_caps {
        md.content_type = ContentType::Series;
        md.season = caps.get(1).and_then(|m| m.as_str().parse().ok());
        md.episode = caps.get(2).and_then(|m| m.as_str().parse().ok());
    }

    let year = select_year(&t);
    md.year = year.map(|(value, _)| value);

    md.title = match year {
        Some((_, position)) => clean_title(&t[..position]),
        None => {
            let without_brackets = BRACKET_GROUP.replace_all(&t, " ").to_string();
            match TITLE_SPLIT.find(&without_brackets) {
                Some(split) => clean_title(&without_brackets[..split.start()]),
                None => clean_title(&without_brackets),
            }
        }
    };

    md
}
