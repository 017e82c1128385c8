//! Chunk-protocol tests driving the streaming runtime with the reference
//! regex library as the pattern-specific find machinery, the same way
//! emitted streaming operations do.

use std::io::{self, Read};

use regex::Regex;
use rexgen::stream::{find_matches, transform, ScanParams, StreamConfig};

/// Hands out its contents `step` bytes per read call, so chunk
/// boundaries land everywhere.
struct Chunked<'a> {
    data: &'a [u8],
    pos: usize,
    step: usize,
}

impl<'a> Chunked<'a> {
    fn new(data: &'a [u8], step: usize) -> Chunked<'a> {
        Chunked { data, pos: 0, step }
    }
}

impl Read for Chunked<'_> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let n = self.step.min(dst.len()).min(self.data.len() - self.pos);
        dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn finder(re: &Regex) -> impl FnMut(&str, usize) -> Option<(usize, usize)> + '_ {
    move |text, from| {
        re.find_at(text, from).map(|m| (m.start(), m.end()))
    }
}

#[test]
fn date_stream_matches_reference_at_any_chunk_size() {
    // Dates every ~50 bytes over a large input.
    let re = Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap();
    let mut hay = String::new();
    for i in 0..1000 {
        hay.push_str(&format!(
            "entry {i} logged at 20{:02}-{:02}-{:02} with padding...\n",
            i % 100,
            1 + i % 12,
            1 + i % 28
        ));
    }
    let want: Vec<(u64, String)> = re
        .find_iter(&hay)
        .map(|m| (m.start() as u64, m.as_str().to_string()))
        .collect();

    let params = ScanParams { min_match_bytes: 10, max_match_bytes: Some(10) };
    for step in [1usize, 7, 50, 256, 4096] {
        let mut got: Vec<(u64, String)> = Vec::new();
        let cfg = StreamConfig {
            buffer_size: 64,
            ..StreamConfig::default()
        };
        let count = find_matches(
            Chunked::new(hay.as_bytes(), step),
            &cfg,
            &params,
            finder(&re),
            |off, text| {
                got.push((off, text.to_string()));
                true
            },
        )
        .unwrap();
        assert_eq!(count as usize, want.len(), "step {step}");
        assert_eq!(got, want, "step {step}");
    }
}

#[test]
fn stream_count_equals_find_all_len() {
    let re = Regex::new(r"\w+@\w+").unwrap();
    let hay = "a@b then c@d then nothing then e@f";
    let want = re.find_iter(hay).count() as u64;
    let params =
        ScanParams { min_match_bytes: 3, max_match_bytes: None };
    let count = find_matches(
        Chunked::new(hay.as_bytes(), 5),
        &StreamConfig::default(),
        &params,
        finder(&re),
        |_, _| true,
    )
    .unwrap();
    assert_eq!(count, want);
}

#[test]
fn unbounded_match_at_stream_end_is_flushed() {
    let re = Regex::new(r"a+").unwrap();
    let hay = "bbbaaaa";
    let params =
        ScanParams { min_match_bytes: 1, max_match_bytes: None };
    let mut got = Vec::new();
    find_matches(
        Chunked::new(hay.as_bytes(), 2),
        &StreamConfig::default(),
        &params,
        finder(&re),
        |off, text| {
            got.push((off, text.to_string()));
            true
        },
    )
    .unwrap();
    assert_eq!(got, vec![(3, "aaaa".to_string())]);
}

#[test]
fn greedy_match_is_not_split_by_chunk_boundary() {
    // A run of 300 a's crosses many 64-byte buffers; it must come out
    // as a single match.
    let re = Regex::new(r"a+").unwrap();
    let mut hay = vec![b'x'; 10];
    hay.extend(vec![b'a'; 300]);
    hay.extend(vec![b'y'; 10]);
    let params =
        ScanParams { min_match_bytes: 1, max_match_bytes: None };
    let cfg = StreamConfig { buffer_size: 64, ..Default::default() };
    let mut got = Vec::new();
    find_matches(
        Chunked::new(&hay, 64),
        &cfg,
        &params,
        finder(&re),
        |off, text| {
            got.push((off, text.len()));
            true
        },
    )
    .unwrap();
    assert_eq!(got, vec![(10, 300)]);
}

#[test]
fn multibyte_input_split_mid_character() {
    let re = Regex::new(r"é+").unwrap();
    let hay = "xxééxx";
    let params =
        ScanParams { min_match_bytes: 2, max_match_bytes: None };
    for step in 1..=6 {
        let mut got = Vec::new();
        // A tiny buffer forces processing chunks that cut the two-byte
        // character in half.
        let cfg = StreamConfig { buffer_size: 4, ..Default::default() };
        find_matches(
            Chunked::new(hay.as_bytes(), step),
            &cfg,
            &params,
            finder(&re),
            |off, text| {
                got.push((off, text.to_string()));
                true
            },
        )
        .unwrap();
        assert_eq!(got, vec![(2, "éé".to_string())], "step {step}");
    }
}

#[test]
fn transform_agrees_with_replace_all() {
    let re = Regex::new(r"\d+").unwrap();
    let hay = "a1b22c333d".repeat(200);
    let want = re.replace_all(&hay, "<N>").to_string();
    let params =
        ScanParams { min_match_bytes: 1, max_match_bytes: None };
    for step in [3usize, 17, 1024] {
        let mut out = Vec::new();
        let cfg = StreamConfig { buffer_size: 32, ..Default::default() };
        let written = transform(
            Chunked::new(hay.as_bytes(), step),
            &mut out,
            &cfg,
            params,
            finder(&re),
            |_, _, out| out.extend_from_slice(b"<N>"),
        )
        .unwrap();
        assert_eq!(String::from_utf8(out.clone()).unwrap(), want);
        assert_eq!(written, out.len() as u64, "step {step}");
    }
}

#[test]
fn transform_with_capture_expansion() {
    let re = Regex::new(r"(?P<user>\w+)@(?P<domain>\w+)").unwrap();
    let hay = "a@b and c@d";
    let params =
        ScanParams { min_match_bytes: 3, max_match_bytes: None };
    let mut out = Vec::new();
    transform(
        Chunked::new(hay.as_bytes(), 4),
        &mut out,
        &StreamConfig::default(),
        params,
        finder(&re),
        |text, (s, e), out| {
            let caps = re.captures(&text[s..e]).unwrap();
            out.extend_from_slice(caps["user"].as_bytes());
            out.extend_from_slice(b"@REDACTED");
        },
    )
    .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "a@REDACTED and c@REDACTED"
    );
}

#[test]
fn zero_width_matches_agree_with_find_iter() {
    // `a*` matches empty at every position of "bbb": four matches, and
    // the trailing one must survive the end-of-stream flush.
    let re = Regex::new(r"a*").unwrap();
    let hay = "bbb";
    let want: Vec<(u64, String)> = re
        .find_iter(hay)
        .map(|m| (m.start() as u64, m.as_str().to_string()))
        .collect();
    assert_eq!(want.len(), 4);
    let params =
        ScanParams { min_match_bytes: 0, max_match_bytes: None };
    for step in 1..=4 {
        let cfg = StreamConfig { buffer_size: 2, ..Default::default() };
        let mut got = Vec::new();
        find_matches(
            Chunked::new(hay.as_bytes(), step),
            &cfg,
            &params,
            finder(&re),
            |off, text| {
                got.push((off, text.to_string()));
                true
            },
        )
        .unwrap();
        assert_eq!(got, want, "step {step}");
    }
}

#[test]
fn zero_byte_source() {
    let re = Regex::new(r"x").unwrap();
    let params =
        ScanParams { min_match_bytes: 1, max_match_bytes: Some(1) };
    let count = find_matches(
        Chunked::new(b"", 8),
        &StreamConfig::default(),
        &params,
        finder(&re),
        |_, _| true,
    )
    .unwrap();
    assert_eq!(count, 0);
}
