//! Content-based MIME detection for video containers

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Bytes read from the head of a file for sniffing
const SNIFF_LEN: usize = 4096;

pub const MIME_MP4: &str = "video/mp4";
pub const MIME_QUICKTIME: &str = "video/quicktime";
pub const MIME_AVI: &str = "video/x-msvideo";
pub const MIME_MATROSKA: &str = "video/x-matroska";
pub const MIME_WEBM: &str = "video/webm";
pub const MIME_FLV: &str = "video/x-flv";
pub const MIME_MPEG_TS: &str = "video/mp2t";
pub const MIME_EMPTY: &str = "inode/x-empty";
pub const MIME_UNKNOWN: &str = "application/octet-stream";

/// Detect the MIME type of `data` from magic numbers
pub fn detect_mime(data: &[u8]) -> &'static str {
    if data.is_empty() {
        return MIME_EMPTY;
    }

    // ISO base media: [size]ftyp[brand]
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return match &data[8..12] {
            b"qt  " => MIME_QUICKTIME,
            _ => MIME_MP4,
        };
    }

    // RIFF ... AVI
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"AVI " {
        return MIME_AVI;
    }

    // EBML header; the DocType tells WebM from Matroska
    if data.len() >= 4 && data[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        let head = &data[..data.len().min(64)];
        if head.windows(4).any(|w| w == b"webm") {
            return MIME_WEBM;
        }
        return MIME_MATROSKA;
    }

    if data.len() >= 3 && &data[0..3] == b"FLV" {
        return MIME_FLV;
    }

    // MPEG-TS packets are 188 bytes, each starting with 0x47
    if data.len() > 188 && data[0] == 0x47 && data[188] == 0x47 {
        return MIME_MPEG_TS;
    }

    MIME_UNKNOWN
}

/// Sniff the MIME type of the file at `path`
pub fn sniff_file(path: &Path) -> std::io::Result<&'static str> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        let read = file.read(&mut buffer[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(detect_mime(&buffer[..filled]))
}

/// Extensions a file of `mime` may legitimately carry
pub fn expected_extensions(mime: &str) -> &'static [&'static str] {
    match mime {
        MIME_MP4 => &["mp4", "m4v"],
        MIME_QUICKTIME => &["mov"],
        MIME_AVI => &["avi"],
        MIME_MATROSKA => &["mkv"],
        MIME_WEBM => &["webm"],
        MIME_FLV => &["flv"],
        MIME_MPEG_TS => &["ts", "mts", "m2ts"],
        _ => &[],
    }
}
