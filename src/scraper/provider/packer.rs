//! Decoder for Dean Edwards' P.A.C.K.E.R. obfuscation, used by several
//! embed hosts to hide their player setup.

use regex::Regex;
use std::sync::LazyLock;

static PACKED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)\}\s*\(\s*'((?:[^'\\]|\\.)*)'\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*'((?:[^'\\]|\\.)*)'\.split\('\|'\)",
    )
    .expect("Invalid packed regex")
});

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("Invalid word regex"));

/// Whether `source` contains a packed script
pub fn is_packed(source: &str) -> bool {
    source.contains("eval(function(p,a,c,k,e,") && PACKED.is_match(source)
}

/// Unpack every packed script in `source`, in order
pub fn unpack_all(source: &str) -> Vec<String> {
    PACKED
        .captures_iter(source)
        .filter_map(|caps| {
            let payload = caps.get(1)?.as_str();
            let radix = caps.get(2)?.as_str().parse().ok()?;
            let words = caps.get(4)?.as_str();
            unpack(payload, radix, words)
        })
        .collect()
}

/// Substitute every token of `payload` with its dictionary word
pub fn unpack(payload: &str, radix: u32, words: &str) -> Option<String> {
    if !(2..=62).contains(&radix) {
        return None;
    }

    let dictionary: Vec<&str> = words.split('|').collect();

    let payload = payload.replace("\\'", "'").replace("\\\\", "\\");
    let unpacked = WORD.replace_all(&payload, |caps: &regex::Captures<'_>| {
        let token = &caps[0];
        decode_base(token, radix)
            .and_then(|index| dictionary.get(index))
            .filter(|word| !word.is_empty())
            .map_or_else(|| token.to_string(), |word| (*word).to_string())
    });

    Some(unpacked.into_owned())
}

fn decode_base(token: &str, radix: u32) -> Option<usize> {
    token.chars().try_fold(0usize, |acc, ch| {
        let digit = match ch {
            '0'..='9' => ch as u32 - '0' as u32,
            'a'..='z' => ch as u32 - 'a' as u32 + 10,
            'A'..='Z' => ch as u32 - 'A' as u32 + 36,
            _ => return None,
        };
        if digit >= radix {
            return None;
        }
        acc.checked_mul(radix as usize)?.checked_add(digit as usize)
    })
}
