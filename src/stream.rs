//! Streaming transform runtime.
//!
//! A host-side library consumed by emitted streaming operations. The
//! emitted code supplies the pattern-specific pieces — a `find_at` closure
//! over its find machinery and, for replacement, a closure that expands one
//! match — and this module owns the chunk protocol: reading, deciding which
//! matches are final, compacting leftover bytes, capping leftover growth,
//! and the end-of-stream flush.
//!
//! Match text handed to callbacks references the internal buffer and is
//! valid only until the callback returns; longer-lived use requires a copy.
//! That aliasing is what keeps the fast path copy-free.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::trace;

pub use crate::error::StreamError;

use crate::pool::{self, PoolGuard};
use crate::scan;

/// Default size of the internal read buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default leftover cap for patterns with no static match-length bound.
pub const DEFAULT_UNBOUNDED_LEFTOVER: usize = 1 << 20;

/// Leftover cap multiplier for bounded patterns.
const BOUNDED_LEFTOVER_FACTOR: usize = 10;

/// A cancellation handle checked at chunk boundaries. Cancellation wins
/// over a callback that asks to stop in the same chunk.
pub type CancelHandle = Arc<AtomicBool>;

/// Stream configuration supplied by the host.
#[derive(Clone, Debug, Default)]
pub struct StreamConfig {
    /// Read buffer size in bytes; 0 means use the default. Must be at
    /// least twice the longest possible match for bounded patterns.
    pub buffer_size: usize,
    /// Maximum bytes retained across chunks waiting for a match to
    /// complete. 0 means use the pattern-dependent default; -1 means
    /// unlimited, which is dangerous on endless streams.
    pub max_leftover: i64,
    /// Initial capacity hint for the transform output buffer; 0 leaves it
    /// to demand. Transform operations only.
    pub max_output_buffer: usize,
    /// Optional cancellation handle.
    pub cancel: Option<CancelHandle>,
}

impl StreamConfig {
    pub fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |c| c.load(Ordering::Relaxed))
    }
}

/// Static facts about the pattern the driver needs, baked into emitted
/// streaming operations as constants.
#[derive(Clone, Copy, Debug)]
pub struct ScanParams {
    /// Fewest bytes a match can span.
    pub min_match_bytes: usize,
    /// Most bytes a match can span; `None` is unbounded.
    pub max_match_bytes: Option<usize>,
}

/// The streaming state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Reading,
    Processing,
    Flushing,
    Done,
    Cancelled,
}

/// Owns the input buffer and the chunk protocol bookkeeping shared by the
/// find and transform drivers.
struct Feeder<R: Read> {
    src: R,
    buf: PoolGuard<Vec<u8>>,
    read_quantum: usize,
    max_leftover: usize,
    cancel: Option<CancelHandle>,
    /// Absolute stream offset of `buf[0]`.
    base: u64,
    eof: bool,
    /// The final processor invocation with `is_eof` set has happened.
    flushed: bool,
    state: State,
}

impl<R: Read> Feeder<R> {
    fn new(
        src: R,
        config: &StreamConfig,
        params: &ScanParams,
    ) -> Result<Feeder<R>, StreamError> {
        let min_buffer = params.max_match_bytes.map_or(1, |m| 2 * m.max(1));
        let buffer_size = match config.buffer_size {
            0 => DEFAULT_BUFFER_SIZE.max(min_buffer),
            n if n < min_buffer => {
                return Err(StreamError::BufferTooSmall {
                    got: n,
                    min: min_buffer,
                })
            }
            n => n,
        };
        let max_leftover = match config.max_leftover {
            -1 => usize::MAX,
            0 => match params.max_match_bytes {
                Some(m) => (BOUNDED_LEFTOVER_FACTOR * m).max(buffer_size),
                None => DEFAULT_UNBOUNDED_LEFTOVER.max(buffer_size),
            },
            n if n < 0 => usize::MAX,
            n => (n as usize).max(min_buffer),
        };
        Ok(Feeder {
            src,
            buf: pool::buffer(buffer_size),
            read_quantum: buffer_size,
            max_leftover,
            cancel: config.cancel.clone(),
            base: 0,
            eof: false,
            flushed: false,
            state: State::Idle,
        })
    }

    fn cancelled(&mut self) -> bool {
        let fired = self
            .cancel
            .as_ref()
            .map_or(false, |c| c.load(Ordering::Relaxed));
        if fired {
            self.state = State::Cancelled;
        }
        fired
    }

    /// Reads up to one buffer quantum of fresh bytes. Leftover bytes stay
    /// in place, so a long partial match grows the buffer rather than
    /// starving the scan.
    fn fill(&mut self) -> Result<(), StreamError> {
        if self.eof {
            self.state = State::Flushing;
            return Ok(());
        }
        self.state = State::Reading;
        let old = self.buf.len();
        let target = old + self.read_quantum;
        self.buf.resize(target, 0);
        let mut filled = old;
        while filled < target {
            match self.src.read(&mut self.buf[filled..target]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buf.truncate(old);
                    return Err(StreamError::Io(e));
                }
            }
        }
        self.buf.truncate(filled);
        self.state =
            if self.eof { State::Flushing } else { State::Processing };
        trace!(
            "stream fill: {} bytes buffered at offset {}, eof={}",
            self.buf.len(),
            self.base,
            self.eof
        );
        Ok(())
    }

    fn data(&self) -> &[u8] {
        &self.buf
    }

    fn at_eof(&self) -> bool {
        self.eof
    }

    /// The minimum number of bytes the processor must dispose of this
    /// round to keep leftover under its cap.
    fn must_consume(&self) -> usize {
        self.buf.len().saturating_sub(self.max_leftover)
    }

    /// Discards `n` processed bytes from the front of the buffer.
    fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.buf.len());
        self.buf.drain(..n);
        self.base += n as u64;
        if self.eof && self.buf.is_empty() && self.flushed {
            self.state = State::Done;
        }
    }

    /// Marks the end-of-input processor invocation as done; required
    /// before the stream counts as finished, so trailing zero-width
    /// matches are not lost.
    fn mark_flushed(&mut self) {
        self.flushed = true;
        if self.buf.is_empty() {
            self.state = State::Done;
        }
    }

    fn done(&self) -> bool {
        self.eof && self.buf.is_empty() && self.flushed
    }
}

/// One round of match scanning over the buffered text. Returns the number
/// of bytes that are safely past every reported match and every potential
/// match start.
///
/// A match is final when it ends before the end of the buffered text or
/// the stream is at EOF; a match that touches the buffer end could still
/// grow, so its bytes are retained. When no match is found, everything
/// except a window of `max_match_bytes - 1` trailing bytes is disposable
/// for bounded patterns; unbounded patterns retain the whole tail up to
/// the leftover cap.
fn scan_round(
    text: &str,
    at_eof: bool,
    params: &ScanParams,
    find_at: &mut dyn FnMut(&str, usize) -> Option<(usize, usize)>,
    on_match: &mut dyn FnMut(usize, usize) -> bool,
) -> (usize, bool) {
    let len = text.len();
    let mut pos = 0usize;
    let mut consumed = 0usize;
    loop {
        if pos > len {
            consumed = consumed.max(no_match_floor(len, at_eof, params));
            return (consumed, false);
        }
        match find_at(text, pos) {
            None => {
                consumed = consumed.max(no_match_floor(len, at_eof, params));
                return (consumed, false);
            }
            Some((s, e)) => {
                debug_assert!(s >= pos && e >= s && e <= len);
                if e == len && !at_eof {
                    // The match touches the buffer end and may extend once
                    // more data arrives; keep everything from its start.
                    return (consumed.max(s), false);
                }
                if !on_match(s, e) {
                    return (consumed.max(e), true);
                }
                pos = if e == s {
                    match text[e..].chars().next() {
                        Some(c) => e + c.len_utf8(),
                        None => len + 1,
                    }
                } else {
                    e
                };
                // An empty match is consumed through the character after
                // it; nothing else can start at the same position, and
                // retaining it would report the match again next round.
                consumed = consumed.max(pos.min(len));
            }
        }
    }
}

/// With no match found, the earliest byte a future match could still
/// start at bounds what must be retained.
fn no_match_floor(len: usize, at_eof: bool, params: &ScanParams) -> usize {
    if at_eof {
        return len;
    }
    match params.max_match_bytes {
        Some(m) => len.saturating_sub(m.saturating_sub(1)),
        None => 0,
    }
}

/// Drives a reader to completion, invoking `on_match` for every match.
/// The match text argument borrows the internal buffer and must be copied
/// for any use past the callback. Returns the number of matches seen.
///
/// `on_match` returning false stops the stream early; cancellation is
/// checked first and wins when both fire in the same chunk.
pub fn find_matches<R: Read>(
    src: R,
    config: &StreamConfig,
    params: &ScanParams,
    mut find_at: impl FnMut(&str, usize) -> Option<(usize, usize)>,
    mut on_match: impl FnMut(u64, &str) -> bool,
) -> Result<u64, StreamError> {
    let mut feeder = Feeder::new(src, config, params)?;
    let mut count = 0u64;
    loop {
        if feeder.cancelled() {
            return Err(StreamError::Cancelled);
        }
        feeder.fill()?;
        if feeder.done() {
            return Ok(count);
        }
        let at_eof = feeder.at_eof();
        let data = feeder.data();
        let text = scan::utf8_prefix(data);
        let base = feeder.base;
        let mut keep_going = true;
        let (consumed, stopped) = scan_round(
            text,
            at_eof,
            params,
            &mut find_at,
            &mut |s, e| {
                count += 1;
                keep_going = on_match(base + s as u64, &text[s..e]);
                keep_going
            },
        );
        let consumed = consumed.max(feeder.must_consume());
        if at_eof {
            feeder.mark_flushed();
        }
        feeder.consume(consumed.min(feeder.data().len()));
        if stopped || !keep_going {
            if feeder.cancelled() {
                return Err(StreamError::Cancelled);
            }
            return Ok(count);
        }
        if feeder.done() {
            return Ok(count);
        }
    }
}

/// A byte-stream filter: reads from `src`, rewrites matches through the
/// supplied closures, and exposes the transformed stream through
/// [`Read`]. Output bytes appear in source order, and the bytes a match
/// expands to appear contiguously where the match was.
pub struct Transform<R, F, G>
where
    R: Read,
    F: FnMut(&str, usize) -> Option<(usize, usize)>,
    G: FnMut(&str, (usize, usize), &mut Vec<u8>),
{
    feeder: Feeder<R>,
    params: ScanParams,
    find_at: F,
    replace: G,
    out: PoolGuard<Vec<u8>>,
    out_pos: usize,
}

impl<R, F, G> Transform<R, F, G>
where
    R: Read,
    F: FnMut(&str, usize) -> Option<(usize, usize)>,
    G: FnMut(&str, (usize, usize), &mut Vec<u8>),
{
    pub fn new(
        src: R,
        config: &StreamConfig,
        params: ScanParams,
        find_at: F,
        replace: G,
    ) -> Result<Self, StreamError> {
        let feeder = Feeder::new(src, config, &params)?;
        let out = pool::buffer(config.max_output_buffer);
        Ok(Transform { feeder, params, find_at, replace, out, out_pos: 0 })
    }

    /// Produces the next round of transformed output into the internal
    /// buffer. Returns false when the stream is exhausted.
    fn pump(&mut self) -> Result<bool, StreamError> {
        self.out.clear();
        self.out_pos = 0;
        loop {
            if self.feeder.cancelled() {
                return Err(StreamError::Cancelled);
            }
            self.feeder.fill()?;
            if self.feeder.done() {
                return Ok(false);
            }
            let at_eof = self.feeder.at_eof();
            if at_eof {
                self.feeder.mark_flushed();
            }
            let data = self.feeder.data();
            let text = scan::utf8_prefix(data);
            let out = &mut *self.out;
            let replace = &mut self.replace;
            // Emit every non-matching run and every final match up to the
            // consume point; retained bytes are emitted on a later round.
            let mut emitted = 0usize;
            let (consumed, _) = scan_round(
                text,
                at_eof,
                &self.params,
                &mut self.find_at,
                &mut |s, e| {
                    out.extend_from_slice(&text.as_bytes()[emitted..s]);
                    replace(text, (s, e), out);
                    emitted = e;
                    true
                },
            );
            let consumed = consumed
                .max(self.feeder.must_consume())
                .min(self.feeder.data().len());
            if consumed > emitted {
                let text = scan::utf8_prefix(self.feeder.data());
                let tail = consumed.min(text.len());
                if tail > emitted {
                    self.out.extend_from_slice(
                        &text.as_bytes()[emitted..tail],
                    );
                }
                // Bytes past the UTF-8 prefix within the consume point are
                // passed through untouched.
                if consumed > text.len() {
                    let raw = self.feeder.data();
                    self.out
                        .extend_from_slice(&raw[text.len()..consumed]);
                }
            }
            self.feeder.consume(consumed);
            if !self.out.is_empty() {
                return Ok(true);
            }
            if self.feeder.done() {
                return Ok(false);
            }
            // Nothing emitted this round (everything retained); read more.
        }
    }
}

impl<R, F, G> Read for Transform<R, F, G>
where
    R: Read,
    F: FnMut(&str, usize) -> Option<(usize, usize)>,
    G: FnMut(&str, (usize, usize), &mut Vec<u8>),
{
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        if self.out_pos >= self.out.len() {
            match self.pump() {
                Ok(true) => {}
                Ok(false) => return Ok(0),
                Err(StreamError::Io(e)) => return Err(e),
                Err(StreamError::Cancelled) => {
                    return Err(io::Error::new(
                        io::ErrorKind::Interrupted,
                        StreamError::Cancelled.to_string(),
                    ))
                }
                Err(e) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        e.to_string(),
                    ))
                }
            }
        }
        let n = (self.out.len() - self.out_pos).min(dst.len());
        dst[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        Ok(n)
    }
}

/// Streams `src` through the replacement closures into `writer`. Returns
/// the number of bytes written.
pub fn transform<R: Read, W: Write>(
    src: R,
    mut writer: W,
    config: &StreamConfig,
    params: ScanParams,
    find_at: impl FnMut(&str, usize) -> Option<(usize, usize)>,
    replace: impl FnMut(&str, (usize, usize), &mut Vec<u8>),
) -> Result<u64, StreamError> {
    let mut t = Transform::new(src, config, params, find_at, replace)?;
    let mut written = 0u64;
    loop {
        match t.pump() {
            Ok(true) => {
                writer.write_all(&t.out)?;
                written += t.out.len() as u64;
            }
            Ok(false) => {
                writer.flush()?;
                return Ok(written);
            }
            Err(e) => return Err(e),
        }
    }
}
