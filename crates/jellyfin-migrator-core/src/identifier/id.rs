use crate::error::{Error, Result};
use md5::{Digest, Md5};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Byte order the server uses when it renders a digest through its GUID type.
pub const GUID_SWAP_ORDER: [usize; 16] = [3, 2, 1, 0, 5, 4, 7, 6, 8, 9, 10, 11, 12, 13, 14, 15];

/// 128-bit item identifier as stored in binary columns.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId([u8; 16]);

impl ItemId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 16]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// MD5 over the UTF-16LE code units of `kind` followed by `path`.
    pub fn derive(kind: &str, path: &str) -> Self {
        let mut hasher = Md5::new();
        for unit in kind.encode_utf16().chain(path.encode_utf16()) {
            hasher.update(unit.to_le_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn encode(&self, encoding: Encoding, swap: &SwapRule) -> EncodedId {
        let bytes = if encoding.is_swapped() {
            swap.apply(&self.0)
        } else {
            self.0
        };
        match encoding.form() {
            None => EncodedId::Binary(bytes.to_vec()),
            Some(TextForm::Hex) => EncodedId::Text(Uuid::from_bytes(bytes).simple().to_string()),
            Some(TextForm::Dashed) => {
                EncodedId::Text(Uuid::from_bytes(bytes).hyphenated().to_string())
            }
        }
    }

    /// Decode a value stored with `encoding`. Text must have the exact shape of the
    /// encoding's form.
    pub fn decode(value: &EncodedId, encoding: Encoding, swap: &SwapRule) -> Option<Self> {
        let bytes = match (value, encoding.form()) {
            (EncodedId::Binary(raw), None) => <[u8; 16]>::try_from(raw.as_slice()).ok()?,
            (EncodedId::Text(text), Some(form)) if TextForm::of(text) == Some(form) => {
                *Uuid::try_parse(text).ok()?.as_bytes()
            }
            _ => return None,
        };
        Some(if encoding.is_swapped() {
            Self(swap.revert(&bytes))
        } else {
            Self(bytes)
        })
    }

    pub fn to_hex(&self) -> String {
        Uuid::from_bytes(self.0).simple().to_string()
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.to_hex())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A concrete stored representation of an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EncodedId {
    Binary(Vec<u8>),
    Text(String),
}

/// Textual shapes an identifier takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextForm {
    /// 32 lowercase hex digits.
    Hex,
    /// 8-4-4-4-12 lowercase hex groups.
    Dashed,
}

impl TextForm {
    pub fn len(self) -> usize {
        match self {
            TextForm::Hex => 32,
            TextForm::Dashed => 36,
        }
    }

    /// Shape of `text` when the whole string is an identifier.
    pub fn of(text: &str) -> Option<Self> {
        if is_form(text.as_bytes(), TextForm::Dashed) {
            Some(TextForm::Dashed)
        } else if is_form(text.as_bytes(), TextForm::Hex) {
            Some(TextForm::Hex)
        } else {
            None
        }
    }
}

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

fn is_form(bytes: &[u8], form: TextForm) -> bool {
    if bytes.len() != form.len() {
        return false;
    }
    let hex_ok = match form {
        TextForm::Hex => bytes.iter().all(|b| is_lower_hex(*b)),
        TextForm::Dashed => bytes.iter().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => *b == b'-',
            _ => is_lower_hex(*b),
        }),
    };
    // 32 decimal digits is a number, not a digest
    hex_ok && !bytes.iter().all(|b| b.is_ascii_digit() || *b == b'-')
}

/// Encoding tags that may be declared for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Bin,
    Str,
    StrDash,
    AncestorBin,
    AncestorStr,
    AncestorStrDash,
}

impl Encoding {
    pub const ALL: [Encoding; 6] = [
        Encoding::Bin,
        Encoding::Str,
        Encoding::StrDash,
        Encoding::AncestorBin,
        Encoding::AncestorStr,
        Encoding::AncestorStrDash,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Encoding::Bin => "bin",
            Encoding::Str => "str",
            Encoding::StrDash => "str-dash",
            Encoding::AncestorBin => "ancestor-bin",
            Encoding::AncestorStr => "ancestor-str",
            Encoding::AncestorStrDash => "ancestor-str-dash",
        }
    }

    pub fn is_swapped(self) -> bool {
        matches!(
            self,
            Encoding::AncestorBin | Encoding::AncestorStr | Encoding::AncestorStrDash
        )
    }

    /// `None` for binary encodings.
    pub fn form(self) -> Option<TextForm> {
        match self {
            Encoding::Bin | Encoding::AncestorBin => None,
            Encoding::Str | Encoding::AncestorStr => Some(TextForm::Hex),
            Encoding::StrDash | Encoding::AncestorStrDash => Some(TextForm::Dashed),
        }
    }

    pub fn text(form: TextForm, swapped: bool) -> Self {
        match (form, swapped) {
            (TextForm::Hex, false) => Encoding::Str,
            (TextForm::Dashed, false) => Encoding::StrDash,
            (TextForm::Hex, true) => Encoding::AncestorStr,
            (TextForm::Dashed, true) => Encoding::AncestorStrDash,
        }
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        Encoding::ALL
            .into_iter()
            .find(|e| e.tag() == tag)
            .ok_or_else(|| Error::UnsupportedEncoding(tag.to_string()))
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Byte permutation applied by the "ancestor" encodings: `out[i] = in[order[i]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRule {
    order: [usize; 16],
}

impl Default for SwapRule {
    fn default() -> Self {
        Self {
            order: GUID_SWAP_ORDER,
        }
    }
}

impl SwapRule {
    pub fn new(order: &[usize]) -> Result<Self> {
        let order: [usize; 16] = order.try_into().map_err(|_| {
            Error::Config(format!(
                "identifier swap order needs 16 entries, got {}",
                order.len()
            ))
        })?;
        let mut seen = [false; 16];
        for &i in &order {
            if i >= 16 || seen[i] {
                return Err(Error::Config(format!(
                    "identifier swap order {:?} is not a permutation of 0..16",
                    order
                )));
            }
            seen[i] = true;
        }
        Ok(Self { order })
    }

    pub fn apply(&self, bytes: &[u8; 16]) -> [u8; 16] {
        let mut out = [0u8; 16];
        for (i, &from) in self.order.iter().enumerate() {
            out[i] = bytes[from];
        }
        out
    }

    pub fn revert(&self, bytes: &[u8; 16]) -> [u8; 16] {
        let mut out = [0u8; 16];
        for (i, &from) in self.order.iter().enumerate() {
            out[from] = bytes[i];
        }
        out
    }
}

/// An identifier-shaped substring located inside a longer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMatch {
    pub start: usize,
    pub end: usize,
    pub form: TextForm,
}

/// Find every identifier-shaped run in `text`. A match must not touch another
/// alphanumeric character on either side.
pub fn find_identifiers(text: &str) -> Vec<IdMatch> {
    let bytes = text.as_bytes();
    let mut matches = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let boundary_before = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
        if boundary_before && is_lower_hex(bytes[i]) {
            let found = [TextForm::Dashed, TextForm::Hex].into_iter().find(|form| {
                let end = i + form.len();
                end <= bytes.len()
                    && is_form(&bytes[i..end], *form)
                    && (end == bytes.len() || !bytes[end].is_ascii_alphanumeric())
            });
            if let Some(form) = found {
                matches.push(IdMatch {
                    start: i,
                    end: i + form.len(),
                    form,
                });
                i += form.len();
                continue;
            }
        }
        i += 1;
    }

    matches
}
