// Sentinel-delimited JSON frames from the sampler's stdout

use serde::Deserialize;

/// Written by the sampler after every JSON frame.
pub const FRAME_SEPARATOR: &str = "852d303a-98f4-4384-a1a3-ebdace595f8c";

/// One reading reported by the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct SamplerFrame {
    /// Percent of one CPU (0-100 per core, summed over the process tree).
    #[serde(default)]
    pub kernel_cpu: f64,
    /// Resident bytes summed over the process tree.
    #[serde(default)]
    pub kernel_memory: f64,
}

impl SamplerFrame {
    pub fn cpu_fraction(&self) -> f64 {
        (self.kernel_cpu / 100.0).max(0.0)
    }

    pub fn memory_bytes(&self) -> u64 {
        self.kernel_memory.max(0.0) as u64
    }
}

/// Accumulates raw output chunks and yields complete frames. Chunks may end anywhere, including
/// inside a frame or inside the separator.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame completed by it. Pieces that are empty after
    /// trimming or do not parse are dropped; only the bytes after the last separator are kept.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SamplerFrame> {
        self.buffer.extend_from_slice(chunk);
        let separator = FRAME_SEPARATOR.as_bytes();
        let Some(last) = find_last(&self.buffer, separator) else {
            return Vec::new();
        };

        let complete = &self.buffer[..last];
        let frames = split(complete, separator)
            .filter_map(|piece| {
                let piece = piece.trim_ascii();
                if piece.is_empty() {
                    return None;
                }
                match serde_json::from_slice::<SamplerFrame>(piece) {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        tracing::trace!(error = %e, "dropping malformed sampler frame");
                        None
                    }
                }
            })
            .collect();

        self.buffer.drain(..last + separator.len());
        frames
    }

    /// Bytes received after the last separator.
    pub fn residual(&self) -> &[u8] {
        &self.buffer
    }
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

fn split<'a>(mut rest: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        match rest.windows(needle.len()).position(|w| w == needle) {
            Some(i) => {
                let piece = &rest[..i];
                rest = &rest[i + needle.len()..];
                Some(piece)
            }
            None => {
                done = true;
                Some(rest)
            }
        }
    })
}
