//! Origin tags identify the document, server, view and access key a clipboard
//! payload was produced by. They travel inside copied HTML as
//! `<meta name="origin" content="...">`, whose content is the URI component
//! encoding of the payload's clipboard endpoint URL.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{CoreError, ViewId, html::escape_html};

/// Characters `encodeURIComponent` leaves untouched.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub const ORIGIN_META_MARKER: &str = "<meta name=\"origin\" content=\"";
const CLIPBOARD_PATH: &str = "/clipboard?";

// Separators as they appear in the encoded meta content, in required order.
const ENCODED_SEPARATORS: [&str; 4] = [
    "%2Fclipboard%3FWOPISrc%3D",
    "%26ServerId%3D",
    "%26ViewId%3D",
    "%26Tag%3D",
];
const QUERY_FIELDS: [&str; 4] = ["WOPISrc=", "ServerId=", "ViewId=", "Tag="];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OriginTag {
    /// `webserver + serviceRoot`, e.g. `https://host:9980/prefix`.
    pub base: String,
    pub document_id: String,
    pub server_id: String,
    pub view_id: ViewId,
    pub access_key: String,
}

impl OriginTag {
    pub fn path(&self) -> String {
        format!(
            "{CLIPBOARD_PATH}WOPISrc={}&ServerId={}&ViewId={}&Tag={}",
            encode_component(&self.document_id),
            encode_component(&self.server_id),
            self.view_id,
            encode_component(&self.access_key),
        )
    }

    /// The clipboard endpoint holding this tag's payload.
    pub fn url(&self) -> String {
        format!("{}{}", self.base, self.path())
    }

    /// Endpoint URL narrowed to a single MIME part of the stored payload.
    pub fn url_for_mime(&self, mime: &str) -> String {
        format!("{}&MimeType={}", self.url(), mime)
    }

    /// Value embedded as the origin meta content.
    pub fn encode(&self) -> String {
        encode_component(&self.url())
    }

    pub fn decode(encoded: &str) -> Result<Self, CoreError> {
        let mut cursor = 0usize;
        for separator in ENCODED_SEPARATORS {
            match encoded[cursor..].find(separator) {
                Some(found) => cursor += found + separator.len(),
                None => {
                    return Err(CoreError::MalformedOrigin(format!(
                        "missing {separator} separator"
                    )));
                }
            }
        }

        let url = decode_component(encoded)?;
        let path_start = url
            .find(CLIPBOARD_PATH)
            .ok_or_else(|| CoreError::MalformedOrigin("missing clipboard path".to_owned()))?;
        let base = url[..path_start].to_owned();
        let query = &url[path_start + CLIPBOARD_PATH.len()..];

        let fields = query.split('&').collect::<Vec<_>>();
        if fields.len() != QUERY_FIELDS.len() {
            return Err(CoreError::MalformedOrigin(format!(
                "expected {} query fields, found {}",
                QUERY_FIELDS.len(),
                fields.len()
            )));
        }

        let mut values = Vec::with_capacity(QUERY_FIELDS.len());
        for (field, prefix) in fields.iter().zip(QUERY_FIELDS) {
            let value = field.strip_prefix(prefix).ok_or_else(|| {
                CoreError::MalformedOrigin(format!("expected field {prefix} got {field}"))
            })?;
            values.push(decode_component(value)?);
        }

        let [document_id, server_id, view_id, access_key]: [String; 4] = values
            .try_into()
            .map_err(|_| CoreError::MalformedOrigin("expected four query values".to_owned()))?;
        let view_id = view_id
            .parse::<ViewId>()
            .map_err(|_| CoreError::MalformedOrigin(format!("bad view id {view_id}")))?;

        Ok(Self {
            base,
            document_id,
            server_id,
            view_id,
            access_key,
        })
    }

    /// Same document, server and view, ignoring the access key.
    pub fn same_session(&self, other: &OriginTag) -> bool {
        self.document_id == other.document_id
            && self.server_id == other.server_id
            && self.view_id == other.view_id
    }
}

/// Looks for an origin meta tag in pasted HTML.
///
/// Returns `None` when there is no marker, and also when the marker carries
/// something that is not one of our tags: foreign HTML is never trusted as
/// an origin claim.
pub fn find_origin(html: &str) -> Option<OriginTag> {
    let start = html.find(ORIGIN_META_MARKER)? + ORIGIN_META_MARKER.len();
    let Some(len) = html[start..].find('"') else {
        warn!("unterminated origin meta tag");
        return None;
    };
    let meta = &html[start..start + len];

    match OriginTag::decode(meta) {
        Ok(tag) => Some(tag),
        Err(err) => {
            warn!(meta, "mis-understood foreign origin: {err}");
            None
        }
    }
}

/// Stub HTML put on the OS clipboard when the real selection cannot be
/// placed synchronously. Pasting it back into an editing session lets the
/// session find the real content through the embedded origin.
pub fn stub_html(origin: &OriginTag, message: &str, lang: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 4.0 Transitional//EN\">\n",
            "<html>\n",
            "  <head>\n",
            "     <meta http-equiv=\"content-type\" content=\"text/html; charset=utf-8\"/>\n",
            "     {marker}{origin}\"/>\n",
            "  </head>\n",
            "  <body lang=\"{lang}\" dir=\"ltr\">\n",
            "    <p>{message}</p>\n",
            "  </body>\n",
            "</html>"
        ),
        marker = ORIGIN_META_MARKER,
        origin = origin.encode(),
        lang = escape_html(lang),
        message = escape_html(message),
    )
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

fn decode_component(value: &str) -> Result<String, CoreError> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|err| CoreError::MalformedOrigin(format!("invalid percent-encoding: {err}")))
}
