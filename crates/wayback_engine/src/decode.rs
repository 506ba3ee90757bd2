use chardetng::EncodingDetector;
use encoding_rs::Encoding;

/// Page text recovered from an archived body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPage {
    pub text: String,
    pub encoding: &'static str,
    /// Some byte sequences were invalid and got replaced.
    pub lossy: bool,
}

/// Whether a capture is worth scanning for links. Without a declared
/// type the body is sniffed for an HTML tag near its start.
pub fn is_html(content_type: Option<&str>, body: &[u8]) -> bool {
    match content_type.map(media_type) {
        Some(media) if !media.is_empty() => {
            media.eq_ignore_ascii_case("text/html") || media.eq_ignore_ascii_case("application/xhtml+xml")
        }
        _ => {
            let head = &body[..body.len().min(512)];
            let head = String::from_utf8_lossy(head).to_ascii_lowercase();
            head.contains("<html") || head.contains("<!doctype html")
        }
    }
}

/// Decodes bytes trying, in order: BOM, Content-Type charset, detection.
/// Never fails; undecodable sequences become U+FFFD.
pub fn decode_page(body: &[u8], content_type: Option<&str>) -> DecodedPage {
    let encoding = Encoding::for_bom(body)
        .map(|(encoding, _)| encoding)
        .or_else(|| content_type.and_then(charset).and_then(|label| Encoding::for_label(label.as_bytes())))
        .unwrap_or_else(|| {
            let mut detector = EncodingDetector::new();
            detector.feed(body, true);
            detector.guess(None, true)
        });
    let (text, _, lossy) = encoding.decode(body);
    DecodedPage {
        text: text.into_owned(),
        encoding: encoding.name(),
        lossy,
    }
}

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

fn charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']).to_string())
    })
}
