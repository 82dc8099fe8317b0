//! Human-readable summary of an enrolled identity response.

use quick_xml::{events::Event, Reader};
use std::{fmt, fs, io, path::Path};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySummary {
    pub given_names: Option<String>,
    pub family_names: Option<String>,
    pub date_of_birth: Option<String>,
}

impl IdentitySummary {
    #[must_use]
    pub fn parse(xml: &[u8]) -> Self {
        let [given_names, family_names, date_of_birth] =
            first_texts(xml, ["GivenNames", "FamilyNames", "DateOfBirth"]);
        Self {
            given_names,
            family_names,
            date_of_birth,
        }
    }

    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&fs::read(path)?))
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.given_names.is_none() && self.family_names.is_none() && self.date_of_birth.is_none()
    }
}

impl fmt::Display for IdentitySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Given Name(s):   ", &self.given_names),
            ("Family Name(s):  ", &self.family_names),
            ("Date Of Birth:   ", &self.date_of_birth),
        ];
        let mut first = true;
        for (title, value) in rows {
            if let Some(value) = value {
                if !first {
                    writeln!(f)?;
                }
                write!(f, "{title}{value}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Text content of the first element with each local name, namespace prefixes
/// ignored. Text of nested children is concatenated. Parsing stops at the first
/// syntax error, keeping what was found up to there.
pub(crate) fn first_texts<const N: usize>(xml: &[u8], names: [&str; N]) -> [Option<String>; N] {
    let mut found: [Option<String>; N] = std::array::from_fn(|_| None);
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    // (index into names, depth of the element, collected text)
    let mut capture: Option<(usize, usize, String)> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                depth += 1;
                if capture.is_none() {
                    let local = start.local_name();
                    capture = names
                        .iter()
                        .enumerate()
                        .find(|(i, name)| found[*i].is_none() && local.as_ref() == name.as_bytes())
                        .map(|(i, _)| (i, depth, String::new()));
                }
            }
            Ok(Event::End(_)) => {
                if let Some((index, at, text)) = capture.take() {
                    if at == depth {
                        found[index] = Some(text.trim().to_string());
                    } else {
                        capture = Some((index, at, text));
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Text(text)) => {
                if let Some((_, _, collected)) = capture.as_mut() {
                    match text.unescape() {
                        Ok(unescaped) => collected.push_str(&unescaped),
                        Err(e) => debug!("skipping undecodable text: {}", e),
                    }
                }
            }
            Ok(Event::CData(data)) => {
                if let Some((_, _, collected)) = capture.as_mut() {
                    collected.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("XML parse stopped at {}: {}", reader.buffer_position(), e);
                break;
            }
        }

        if found.iter().all(Option::is_some) {
            break;
        }
        buf.clear();
    }

    found
}
