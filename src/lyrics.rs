//! TTML lyrics conversion.
//!
//! Each `<p begin=…>` becomes an LRC line `[mm:ss.xx]text`; the unsynced
//! text keeps one line per `<p>` with a blank line between `<div>` stanzas.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{AmdlError, Result};

/// Lyrics in both output forms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lyrics {
    /// LRC text, one timestamped line per lyric line.
    pub synced: Option<String>,
    pub unsynced: Option<String>,
}

impl Lyrics {
    /// Drop the forms disabled by the configuration.
    pub fn filtered(mut self, synced_only: bool, no_synced: bool) -> Self {
        if synced_only {
            self.unsynced = None;
        }
        if no_synced {
            self.synced = None;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.synced.is_none() && self.unsynced.is_none()
    }
}

/// Parse a TTML clock value (`1:02.5`, `00:01:02.500`, `62.5s`) into
/// milliseconds.
pub fn parse_timestamp(value: &str) -> Option<u64> {
    let value = value.trim().trim_end_matches('s');
    let mut total = 0f64;
    for part in value.split(':') {
        total = total * 60.0 + part.parse::<f64>().ok()?;
    }
    if total.is_sign_negative() {
        return None;
    }
    Some((total * 1000.0).round() as u64)
}

/// `[mm:ss.xx]` body for a millisecond offset.
pub fn lrc_timestamp(millis: u64) -> String {
    format!(
        "{:02}:{:02}.{:02}",
        millis / 60_000,
        (millis / 1000) % 60,
        (millis % 1000) / 10
    )
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

struct Line {
    begin: Option<u64>,
    text: String,
}

/// Convert a TTML document.
pub fn parse_ttml(ttml: &str) -> Result<Lyrics> {
    let mut reader = Reader::from_str(ttml);
    let mut stanzas: Vec<Vec<Line>> = Vec::new();
    let mut current: Option<Line> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"div" => stanzas.push(Vec::new()),
                b"p" => {
                    current = Some(Line {
                        begin: attribute(&e, b"begin").and_then(|b| parse_timestamp(&b)),
                        text: String::new(),
                    })
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"br" => {
                if let Some(line) = current.as_mut() {
                    line.text.push(' ');
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(line) = current.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| AmdlError::Lyrics(e.to_string()))?;
                    line.text.push_str(&text);
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"p" => {
                if let Some(mut line) = current.take() {
                    line.text = line.text.split_whitespace().collect::<Vec<_>>().join(" ");
                    if stanzas.is_empty() {
                        stanzas.push(Vec::new());
                    }
                    if let Some(stanza) = stanzas.last_mut() {
                        stanza.push(line);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AmdlError::Lyrics(format!(
                    "TTML error at position {}: {}",
                    reader.error_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    stanzas.retain(|s| !s.is_empty());

    let synced: String = stanzas
        .iter()
        .flatten()
        .filter_map(|l| l.begin.map(|b| format!("[{}]{}\n", lrc_timestamp(b), l.text)))
        .collect();

    let unsynced = stanzas
        .iter()
        .map(|s| s.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n"))
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(Lyrics {
        synced: Some(synced).filter(|s| !s.is_empty()),
        unsynced: Some(unsynced)
            .filter(|s| !s.trim().is_empty())
            .map(|s| s + "\n"),
    })
}
