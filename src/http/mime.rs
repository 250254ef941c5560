//! MIME-type lookup by file extension. Kept as a flat enum + static
//! table rather than a `HashMap`: the extension set is fixed and small, so a
//! linear match compiles down to a jump table anyway.

use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MimeType {
    Html,
    Css,
    Javascript,
    Jpeg,
    Png,
    Gif,
    Svg,
    Mp4,
    Flv,
    M3u8,
    Ts,
    ThreeGp,
    Mov,
    Avi,
    Wmv,
    Default,
}

impl MimeType {
    fn as_str(self) -> &'static str {
        match self {
            MimeType::Html => "text/html",
            MimeType::Css => "text/css",
            MimeType::Javascript => "text/javascript",
            MimeType::Jpeg => "image/jpeg",
            MimeType::Png => "image/png",
            MimeType::Gif => "image/gif",
            MimeType::Svg => "image/svg+xml",
            MimeType::Mp4 => "video/mp4",
            MimeType::Flv => "video/x-flv",
            MimeType::M3u8 => "application/x-mpegURL",
            MimeType::Ts => "video/MP2T",
            MimeType::ThreeGp => "video/3gpp",
            MimeType::Mov => "video/quicktime",
            MimeType::Avi => "video/x-msvideo",
            MimeType::Wmv => "video/x-ms-wmv",
            MimeType::Default => "text/html",
        }
    }
}

fn mime_for_extension(extension: &str) -> MimeType {
    match extension.to_ascii_lowercase().as_str() {
        "html" | "htm" => MimeType::Html,
        "css" => MimeType::Css,
        "js" => MimeType::Javascript,
        "jpg" | "jpeg" => MimeType::Jpeg,
        "png" => MimeType::Png,
        "gif" => MimeType::Gif,
        "svg" => MimeType::Svg,
        "mp4" => MimeType::Mp4,
        "flv" => MimeType::Flv,
        "m3u8" => MimeType::M3u8,
        "ts" => MimeType::Ts,
        "3gp" => MimeType::ThreeGp,
        "mov" => MimeType::Mov,
        "avi" => MimeType::Avi,
        "wmv" => MimeType::Wmv,
        _ => MimeType::Default,
    }
}

/// Unknown extensions (and extension-less paths) default to `text/html`.
pub fn mime_for_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(mime_for_extension)
        .unwrap_or(MimeType::Default)
        .as_str()
}
