//! Substring search over a byte stream that arrives in chunks.

/// `ResultMajor` the issuer returns when the identity read-out succeeded.
pub const SUCCESS_MARKER: &str =
    "<ns3:ResultMajor>http://www.bsi.bund.de/ecard/api/1.1/resultmajor#ok</ns3:ResultMajor>";

/// Finds a marker anywhere in the concatenation of all fed chunks, including
/// occurrences split across chunk boundaries.
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    marker: Vec<u8>,
    tail: Vec<u8>,
    found: bool,
}

impl MarkerScanner {
    #[must_use]
    pub fn new(marker: impl Into<Vec<u8>>) -> Self {
        let marker = marker.into();
        let found = marker.is_empty();
        Self {
            marker,
            tail: Vec::new(),
            found,
        }
    }

    /// Scan the next chunk. Returns whether the marker has been seen so far.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.found || chunk.is_empty() {
            return self.found;
        }

        let mut window = std::mem::take(&mut self.tail);
        window.extend_from_slice(chunk);

        if window
            .windows(self.marker.len())
            .any(|candidate| candidate == self.marker.as_slice())
        {
            self.found = true;
            return true;
        }

        let keep = self.marker.len() - 1;
        if window.len() > keep {
            window.drain(..window.len() - keep);
        }
        self.tail = window;
        false
    }

    #[must_use]
    pub const fn found(&self) -> bool {
        self.found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_marker_inside_one_chunk() {
        let mut scanner = MarkerScanner::new(SUCCESS_MARKER);
        let body = format!("<a>{SUCCESS_MARKER}</a>");
        assert!(scanner.feed(body.as_bytes()));
        assert!(scanner.found());
    }

    #[test]
    fn finds_marker_split_at_every_position() {
        let body = format!("<x>{SUCCESS_MARKER}<y/>");
        for split in 0..=body.len() {
            let (a, b) = body.as_bytes().split_at(split);
            let mut scanner = MarkerScanner::new(SUCCESS_MARKER);
            scanner.feed(a);
            scanner.feed(b);
            assert!(scanner.found(), "split at {split}");
        }
    }

    #[test]
    fn finds_marker_fed_byte_by_byte() {
        let mut scanner = MarkerScanner::new("needle");
        for byte in b"haystack with a need and a needle" {
            scanner.feed(std::slice::from_ref(byte));
        }
        assert!(scanner.found());
    }

    #[test]
    fn partial_marker_is_not_a_match() {
        let mut scanner = MarkerScanner::new(SUCCESS_MARKER);
        scanner.feed(&SUCCESS_MARKER.as_bytes()[..SUCCESS_MARKER.len() - 1]);
        scanner.feed(b"!");
        assert!(!scanner.found());
    }

    #[test]
    fn error_result_is_not_a_match() {
        let mut scanner = MarkerScanner::new(SUCCESS_MARKER);
        scanner.feed(
            b"<ns3:ResultMajor>http://www.bsi.bund.de/ecard/api/1.1/resultmajor#error</ns3:ResultMajor>",
        );
        assert!(!scanner.found());
    }

    #[test]
    fn tail_stays_bounded() {
        let mut scanner = MarkerScanner::new("abc");
        for _ in 0..100 {
            scanner.feed(&[b'x'; 1024]);
        }
        assert!(scanner.tail.len() <= 2);
        assert!(scanner.feed(b"abc"));
    }
}
