use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

// 24 base64 characters decode to 18 bytes, enough for every signature below.
const SNIFF_PREFIX_CHARS: usize = 24;

/// Splits an optional `data:<mime>;base64,` prefix from the payload.
pub fn strip_data_url(image: &str) -> (&str, Option<&str>) {
    let Some(rest) = image.strip_prefix("data:") else {
        return (image, None);
    };
    match rest.split_once(',') {
        Some((meta, payload)) => {
            let mime = meta.split(';').next().filter(|mime| !mime.is_empty());
            (payload, mime)
        }
        None => (image, None),
    }
}

pub fn sniff_mime_type(base64_image: &str) -> &'static str {
    let prefix: String = base64_image
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .take(SNIFF_PREFIX_CHARS)
        .collect();
    if !prefix.is_ascii() {
        return DEFAULT_IMAGE_MIME;
    }
    let usable = prefix.len() - prefix.len() % 4;
    let Ok(bytes) = BASE64.decode(&prefix[..usable]) else {
        return DEFAULT_IMAGE_MIME;
    };

    match bytes.as_slice() {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => DEFAULT_IMAGE_MIME,
    }
}

/// Payload and MIME type ready to embed in a provider request.
pub fn inline_image(image: &str) -> (&str, String) {
    let (payload, declared) = strip_data_url(image);
    let mime = declared
        .map(str::to_string)
        .unwrap_or_else(|| sniff_mime_type(payload).to_string());
    (payload, mime)
}
