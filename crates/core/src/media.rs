//! Media-type classification for manifest items and content references.

pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
pub const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// Guess a media type from a path's extension.
pub fn media_type_for_path(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path);
    let ext = match name.rfind('.') {
        Some(i) => name[i + 1..].to_ascii_lowercase(),
        None => return "application/octet-stream",
    };
    match ext.as_str() {
        "xhtml" | "xht" => "application/xhtml+xml",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "ncx" => NCX_MEDIA_TYPE,
        "opf" => PACKAGE_MEDIA_TYPE,
        "css" => "text/css",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "ogg" | "oga" => "audio/ogg",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Raster images become standalone image chapters. SVG is markup and is not
/// treated as an image here.
pub fn is_raster_image(path: &str, media_type: &str) -> bool {
    let media_type = media_type.trim().to_ascii_lowercase();
    if media_type.starts_with("image/") {
        return media_type != "image/svg+xml";
    }
    matches!(
        media_type_for_path(path),
        "image/jpeg" | "image/png" | "image/gif" | "image/webp" | "image/bmp"
    )
}

/// HTML, XHTML, generic XML, and SVG documents can carry chapter text. The
/// NCX and the package document are XML but never chapters.
pub fn is_markup(media_type: &str) -> bool {
    let media_type = media_type.trim().to_ascii_lowercase();
    if is_package_media_type(&media_type) {
        return false;
    }
    media_type.contains("html") || media_type.contains("xml") || media_type.contains("svg")
}

/// NCX or OPF, by media type or, when that is blank, by extension.
pub fn is_package_document(path: &str, media_type: &str) -> bool {
    let media_type = media_type.trim();
    if media_type.is_empty() {
        is_package_media_type(media_type_for_path(path))
    } else {
        is_package_media_type(&media_type.to_ascii_lowercase())
    }
}

fn is_package_media_type(media_type: &str) -> bool {
    media_type == NCX_MEDIA_TYPE || media_type == PACKAGE_MEDIA_TYPE
}
