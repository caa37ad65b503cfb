#[cfg(feature = "indicatif")]
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};

/// Digest bytes kept in the fallback name of a tile without a usable file name.
const UNNAMED_DIGEST_BYTES: usize = 8;

/// Last path segment of a URL (query string excluded), if any.
pub fn url_file_name(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().and_then(|s| s.last().map(String::from)))
        .filter(|s| !s.is_empty())
}

/// Tile identifier ("bloc") derived from its URL: file name without extensions.
///
/// `https://.../LHD_FXX_0651_6862_PTS_C_LAMB93_IGN69.copc.laz` gives
/// `LHD_FXX_0651_6862_PTS_C_LAMB93_IGN69`.
pub fn url_to_bloc(url: &str) -> Option<String> {
    let name = url_file_name(url)?;
    let stem = name.split('.').next().unwrap_or_default();
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

/// Filesystem-safe file name for a tile URL.
pub fn sanitized_file_name(url: &str) -> String {
    let sanitized: String = url_file_name(url)
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        // Digest keeps distinct URLs apart when none has a usable file name
        let digest = Sha256::digest(url.as_bytes());
        let prefix: String = digest[..UNNAMED_DIGEST_BYTES]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        format!("unnamed_{}.laz", prefix)
    } else {
        sanitized
    }
}

#[cfg(feature = "indicatif")]
pub(crate) fn progress_bar(len: u64, message: &'static str) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {percent} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    let pb = ProgressBar::new(len);
    pb.set_style(style);
    pb.set_message(message);
    pb
}
