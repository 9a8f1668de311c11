//! Key names accepted by `send-keys`.

use std::borrow::Cow;

/// Encodes `send-keys` arguments. With `literal` every argument is sent as
/// text; otherwise recognised key names translate and the rest pass through.
pub fn encode_keys(args: &[String], literal: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for arg in args {
        if literal {
            out.extend_from_slice(arg.as_bytes());
            continue;
        }
        match named_key(arg) {
            Some(bytes) => out.extend_from_slice(&bytes),
            None => out.extend_from_slice(arg.as_bytes()),
        }
    }
    out
}

fn named_key(name: &str) -> Option<Cow<'static, [u8]>> {
    let fixed: &'static [u8] = match name {
        "Enter" | "KPEnter" => b"\r",
        "Tab" => b"\t",
        "BTab" => b"\x1b[Z",
        "Space" => b" ",
        "BSpace" => b"\x7f",
        "Escape" => b"\x1b",
        "Up" => b"\x1b[A",
        "Down" => b"\x1b[B",
        "Right" => b"\x1b[C",
        "Left" => b"\x1b[D",
        "Home" => b"\x1b[H",
        "End" => b"\x1b[F",
        "IC" | "Insert" => b"\x1b[2~",
        "DC" | "Delete" => b"\x1b[3~",
        "PPage" | "PageUp" => b"\x1b[5~",
        "NPage" | "PageDown" => b"\x1b[6~",
        _ => return modified_key(name).map(Cow::Owned),
    };
    Some(Cow::Borrowed(fixed))
}

/// `C-x`, `^x` and `M-x` forms.
fn modified_key(name: &str) -> Option<Vec<u8>> {
    if let Some(rest) = name.strip_prefix("M-") {
        let mut out = vec![0x1b];
        match named_key(rest) {
            Some(bytes) => out.extend_from_slice(&bytes),
            None if rest.chars().count() == 1 => out.extend_from_slice(rest.as_bytes()),
            None => return None,
        }
        return Some(out);
    }
    let key = name.strip_prefix("C-").or_else(|| name.strip_prefix('^'))?;
    let mut chars = key.chars();
    let (Some(ch), None) = (chars.next(), chars.next()) else {
        return None;
    };
    control_code(ch).map(|code| vec![code])
}

fn control_code(ch: char) -> Option<u8> {
    match ch {
        'a'..='z' | 'A'..='Z' => Some(ch.to_ascii_lowercase() as u8 & 0x1f),
        '@' | ' ' | '2' => Some(0x00),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '7' | '/' => Some(0x1f),
        '?' | '8' => Some(0x7f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn named_keys_translate() {
        assert_eq!(encode_keys(&keys(&["ls", "Space", "-l", "Enter"]), false), b"ls -l\r");
        assert_eq!(encode_keys(&keys(&["C-c", "C-d", "^z"]), false), vec![0x03, 0x04, 0x1a]);
        assert_eq!(encode_keys(&keys(&["Up", "Left", "BSpace"]), false), b"\x1b[A\x1b[D\x7f");
        assert_eq!(encode_keys(&keys(&["M-x", "M-Enter"]), false), b"\x1bx\x1b\r");
    }

    #[test]
    fn literal_mode_sends_names_verbatim() {
        assert_eq!(encode_keys(&keys(&["Enter", "C-c"]), true), b"EnterC-c");
    }

    #[test]
    fn unknown_modifiers_pass_through() {
        assert_eq!(encode_keys(&keys(&["C-", "C-ab", "M-xy"]), false), b"C-C-abM-xy");
    }
}
