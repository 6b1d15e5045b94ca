//! CSI escape-sequence rewriting.
//!
//! Child process output is printed behind a log margin (the scope prefix).
//! Programs that reposition the cursor would break out of that margin, so two
//! sequences are transformed before printing:
//!
//! - cursor horizontal absolute (`ESC [ n G`) is shifted right by the margin;
//! - erase-in-line (`ESC [ 1 K` / `ESC [ 2 K`) is bracketed with save-cursor,
//!   a jump to column one, the margin prefix, and restore-cursor, so the
//!   erased line keeps its prefix.
//!
//! Everything else passes through unchanged.

/// A parsed segment of a terminal stream: either a CSI escape sequence or a
/// run of plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Csi { params: Vec<u8>, intermediate: Vec<u8>, final_: u8 },
  Text(Vec<u8>),
}

/// Split `input` into CSI and text segments. Malformed or truncated escape
/// sequences are preserved as text.
pub fn parse(input: &[u8]) -> Vec<Segment> {
  let mut segments = Vec::new();
  let mut text: Vec<u8> = Vec::new();
  let mut i = 0;
  while i < input.len() {
    if input[i] == 0x1b && input.get(i + 1) == Some(&b'[') {
      let mut params = Vec::new();
      let mut intermediate = Vec::new();
      let mut j = i + 2;
      let mut final_ = None;
      while j < input.len() {
        let b = input[j];
        match b {
          0x30..=0x3f => params.push(b),
          0x20..=0x2f => intermediate.push(b),
          0x40..=0x7e => {
            final_ = Some(b);
            break;
          }
          _ => break,
        }
        j += 1;
      }
      if let Some(final_) = final_ {
        if !text.is_empty() {
          segments.push(Segment::Text(std::mem::take(&mut text)));
        }
        segments.push(Segment::Csi { params, intermediate, final_ });
        i = j + 1;
        continue;
      }
    }
    text.push(input[i]);
    i += 1;
  }
  if !text.is_empty() {
    segments.push(Segment::Text(text));
  }
  segments
}

/// Rewrite the CSI sequences in `input` to respect a `margin`-column log
/// prefix, re-emitting `prefix` after erase-in-line sequences.
pub fn rewrite(input: &[u8], margin: usize, prefix: &str) -> Vec<u8> {
  let mut out = Vec::with_capacity(input.len());
  for segment in parse(input) {
    match segment {
      Segment::Text(text) => out.extend_from_slice(&text),
      Segment::Csi { params, intermediate, final_ } => {
        let int_params = int_params(&params);
        match (final_, int_params.as_deref()) {
          (b'G', Some([n])) => {
            out.extend_from_slice(format!("\x1b[{}G", n + margin as i64 + 2).as_bytes());
          }
          (b'K', Some([1] | [2])) => {
            out.extend_from_slice(b"\x1b7");
            emit(&mut out, &params, &intermediate, final_);
            out.extend_from_slice(b"\x1b[1G");
            out.extend_from_slice(prefix.as_bytes());
            out.extend_from_slice(b"\x1b8");
          }
          _ => emit(&mut out, &params, &intermediate, final_),
        }
      }
    }
  }
  out
}

fn emit(out: &mut Vec<u8>, params: &[u8], intermediate: &[u8], final_: u8) {
  out.extend_from_slice(b"\x1b[");
  out.extend_from_slice(params);
  out.extend_from_slice(intermediate);
  out.push(final_);
}

/// The `;`-separated CSI parameters as integers, or `None` if any fails to
/// parse.
fn int_params(params: &[u8]) -> Option<Vec<i64>> {
  std::str::from_utf8(params)
    .ok()?
    .split(';')
    .map(|p| p.parse::<i64>().ok())
    .collect()
}
