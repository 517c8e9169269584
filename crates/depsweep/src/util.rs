use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Text encoding a source file was successfully decoded with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8,
    Utf8WithBom,
    Latin1,
}

impl SourceEncoding {
    /// Encode text back into the bytes this encoding would have produced it from.
    ///
    /// Latin-1 text only round-trips when every char is in U+0000..=U+00FF; anything
    /// outside that range is written as UTF-8 instead of being silently mangled.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Utf8WithBom => {
                let mut bytes = Vec::with_capacity(UTF8_BOM.len() + text.len());
                bytes.extend_from_slice(UTF8_BOM);
                bytes.extend_from_slice(text.as_bytes());
                bytes
            }
            Self::Latin1 => {
                if text.chars().all(|c| u32::from(c) <= 0xFF) {
                    text.chars().map(|c| u32::from(c) as u8).collect()
                } else {
                    text.as_bytes().to_vec()
                }
            }
        }
    }
}

/// Decoded source text with the encoding that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText {
    pub text: String,
    pub encoding: SourceEncoding,
}

/// Decode raw file bytes, trying UTF-8, UTF-8 with BOM, then Latin-1
pub fn decode_source(bytes: Vec<u8>) -> SourceText {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        if let Ok(text) = std::str::from_utf8(rest) {
            return SourceText {
                text: text.to_owned(),
                encoding: SourceEncoding::Utf8WithBom,
            };
        }
    }

    match String::from_utf8(bytes) {
        Ok(text) => SourceText {
            text,
            encoding: SourceEncoding::Utf8,
        },
        Err(err) => {
            log::trace!("UTF-8 decoding failed ({err}), falling back to Latin-1");
            SourceText {
                text: err.into_bytes().iter().map(|&b| char::from(b)).collect(),
                encoding: SourceEncoding::Latin1,
            }
        }
    }
}

/// Read and decode a Python source file
pub fn read_source(path: &Path) -> Result<SourceText> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    Ok(decode_source(bytes))
}

/// Write text back using the encoding it was read with
pub fn write_source(path: &Path, text: &str, encoding: SourceEncoding) -> Result<()> {
    fs::write(path, encoding.encode(text))
        .with_context(|| format!("Failed to write file: {:?}", path))
}

/// Top-level segment of a dotted module path (`os.path` -> `os`)
pub fn root_module(module_name: &str) -> &str {
    module_name.split('.').next().unwrap_or(module_name)
}
